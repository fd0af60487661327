//! Credential identities and the storage-key codec
//!
//! A credential is addressed by `(prefix, service, variable)`. Secret stores
//! only understand one opaque string, so the fields are joined with `:` after
//! escaping `%` and `:` inside each field:
//!
//! ```text
//! ("dev", "github", "token")   ->  dev:github:token
//! ("a:b", "50%", "x")          ->  a%3Ab:50%25:x
//! ```
//!
//! Only the two canonical escapes are accepted when decoding, which keeps the
//! mapping a bijection over valid keys.

use std::fmt;

use crate::error::{Error, Result};

const SEPARATOR: char = ':';
const ESCAPE: char = '%';
const ESCAPED_ESCAPE: &str = "%25";
const ESCAPED_SEPARATOR: &str = "%3A";

/// Characters that can never appear in a field
const FORBIDDEN: [char; 3] = ['/', '\\', '\0'];

/// Identity of a stored credential
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialKey {
    prefix: String,
    service: String,
    variable: String,
}

impl CredentialKey {
    /// Build a key, trimming trailing dots from the prefix
    pub fn new(
        prefix: impl Into<String>,
        service: impl Into<String>,
        variable: impl Into<String>,
    ) -> Result<Self> {
        let prefix = normalize_prefix(&prefix.into())?;
        let service = service.into();
        let variable = variable.into();

        validate_field("service", &service)?;
        validate_field("variable", &variable)?;

        Ok(Self {
            prefix,
            service,
            variable,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// `service/variable`, the form shown to users within a prefix
    pub fn label(&self) -> String {
        format!("{}/{}", self.service, self.variable)
    }

    pub fn storage_key(&self) -> StorageKey {
        KeyCodec::encode(self)
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (prefix '{}')", self.service, self.variable, self.prefix)
    }
}

/// Encoded key handed to secret-store backends
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deterministic mapping between [`CredentialKey`] and [`StorageKey`]
pub struct KeyCodec;

impl KeyCodec {
    pub fn encode(key: &CredentialKey) -> StorageKey {
        let mut out = String::with_capacity(
            key.prefix.len() + key.service.len() + key.variable.len() + 2,
        );
        escape_into(&mut out, &key.prefix);
        out.push(SEPARATOR);
        escape_into(&mut out, &key.service);
        out.push(SEPARATOR);
        escape_into(&mut out, &key.variable);
        StorageKey(out)
    }

    /// Validate raw parts and encode them
    pub fn encode_parts(prefix: &str, service: &str, variable: &str) -> Result<StorageKey> {
        Ok(Self::encode(&CredentialKey::new(prefix, service, variable)?))
    }

    /// Leading part shared by every storage key under `prefix`
    pub fn prefix_marker(prefix: &str) -> String {
        let mut out = String::with_capacity(prefix.len() + 1);
        escape_into(&mut out, prefix);
        out.push(SEPARATOR);
        out
    }

    pub fn decode(raw: &str) -> Result<CredentialKey> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        if parts.len() != 3 {
            return Err(corrupt(
                raw,
                format!("expected 3 fields, found {}", parts.len()),
            ));
        }

        let prefix = unescape(raw, parts[0])?;
        let service = unescape(raw, parts[1])?;
        let variable = unescape(raw, parts[2])?;

        // Encoded prefixes are always normalized; anything else did not come from encode()
        if prefix.ends_with('.') {
            return Err(corrupt(raw, "prefix has a trailing dot".to_string()));
        }

        for (field, value) in [
            ("prefix", &prefix),
            ("service", &service),
            ("variable", &variable),
        ] {
            validate_field(field, value).map_err(|e| corrupt(raw, e.to_string()))?;
        }

        Ok(CredentialKey {
            prefix,
            service,
            variable,
        })
    }
}

/// Normalize and validate a prefix on its own (listing operations)
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    let trimmed = prefix.trim_end_matches('.');
    validate_field("prefix", trimmed)?;
    Ok(trimmed.to_string())
}

fn validate_field(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidKey {
            field,
            reason: "cannot be empty".to_string(),
        });
    }

    if let Some(c) = value.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(Error::InvalidKey {
            field,
            reason: format!("contains forbidden character {:?}", c),
        });
    }

    Ok(())
}

fn escape_into(out: &mut String, field: &str) {
    for c in field.chars() {
        match c {
            ESCAPE => out.push_str(ESCAPED_ESCAPE),
            SEPARATOR => out.push_str(ESCAPED_SEPARATOR),
            c => out.push(c),
        }
    }
}

fn unescape(raw: &str, field: &str) -> Result<String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();

    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }

        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push(ESCAPE),
            "3A" => out.push(SEPARATOR),
            other => {
                return Err(corrupt(raw, format!("unknown escape sequence '%{}'", other)));
            }
        }
    }

    Ok(out)
}

fn corrupt(raw: &str, reason: String) -> Error {
    Error::CorruptKey {
        key: raw.to_string(),
        reason,
    }
}
