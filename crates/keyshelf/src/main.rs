//! keyshelf - local credential storage over the OS keychain
//!
//! Operations (exactly one per invocation):
//! - --set: Store a credential (prompts securely unless --value/--stdin)
//! - --get: Print a credential
//! - --delete: Delete a credential
//! - --list: List credentials under a prefix
//! - --list-prefixes: List every prefix in use
//! - --delete-prefix: Delete every credential under a prefix
//!
//! Exit codes: 0 success, 1 error, 2 usage error, 3 credential not found,
//! 4 listing not supported by the selected store.

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{ArgGroup, CommandFactory, Parser};
use keyshelf::{CredentialKey, CredentialService, DeleteStatus, Listing, Request, Response};
use keyshelf_core::{BackendKind, Config, Paths};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_NOT_FOUND: u8 = 3;
const EXIT_UNSUPPORTED: u8 = 4;

#[derive(Parser)]
#[command(name = "keyshelf")]
#[command(about = "Secure credential storage using the system keychain, with prefix discovery")]
#[command(version)]
#[command(group(
    ArgGroup::new("operation")
        .required(true)
        .args(["set", "get", "delete", "list", "list_prefixes", "delete_prefix"])
))]
#[command(after_help = r#"EXAMPLES:
    keyshelf --set -s github -v token -p myapp
    keyshelf --get -s github -v token -p myapp --quiet
    keyshelf --delete -s github -v token -p myapp
    keyshelf --list -p myapp
    keyshelf --list-prefixes --use-filesystem
    keyshelf --delete-prefix -p old-app --force

STORAGE:
    - Secrets live in the OS keychain (service "keyshelf")
    - Without a reachable keychain, an age-encrypted vault is used
      under ~/.local/share/keyshelf/vault/
    - --use-filesystem tracks credentials in ~/.config/keyshelf/index.json
      for reliable listing; otherwise listing asks the store itself"#)]
struct Cli {
    /// Store a credential
    #[arg(long)]
    set: bool,

    /// Retrieve a credential
    #[arg(long)]
    get: bool,

    /// Delete a credential
    #[arg(long)]
    delete: bool,

    /// List all credentials for a prefix
    #[arg(long)]
    list: bool,

    /// List all discovered prefixes
    #[arg(long)]
    list_prefixes: bool,

    /// Delete all credentials with a prefix
    #[arg(long)]
    delete_prefix: bool,

    /// Service name (e.g., github)
    #[arg(short, long)]
    service: Option<String>,

    /// Variable/credential name (e.g., token)
    #[arg(short, long)]
    variable: Option<String>,

    /// Prefix for namespacing (default from config, "mcp" out of the box)
    #[arg(short, long)]
    prefix: Option<String>,

    /// Force operation without confirmation
    #[arg(short, long)]
    force: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Use a local index file for listing (more reliable)
    #[arg(long)]
    use_filesystem: bool,

    /// Credential value for --set (omit for a hidden prompt)
    #[arg(long, conflicts_with = "stdin")]
    value: Option<String>,

    /// Read the credential value for --set from one line of stdin
    #[arg(long)]
    stdin: bool,

    /// Output listings and summaries as JSON
    #[arg(long)]
    json: bool,

    /// Drop index entries whose secret no longer exists when listing
    #[arg(long)]
    verify: bool,

    /// Secret store to use: auto, keychain or vault
    #[arg(long)]
    backend: Option<BackendKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Set,
    Get,
    Delete,
    List,
    ListPrefixes,
    DeletePrefix,
}

impl Operation {
    fn needs_credential(self) -> bool {
        matches!(self, Operation::Set | Operation::Get | Operation::Delete)
    }
}

impl Cli {
    fn operation(&self) -> Operation {
        if self.set {
            Operation::Set
        } else if self.get {
            Operation::Get
        } else if self.delete {
            Operation::Delete
        } else if self.list {
            Operation::List
        } else if self.list_prefixes {
            Operation::ListPrefixes
        } else {
            Operation::DeletePrefix
        }
    }

    /// Apply command-line overrides on top of the config file
    fn apply(&self, mut config: Config) -> Config {
        if let Some(prefix) = &self.prefix {
            config.default_prefix = prefix.clone();
        }
        if self.use_filesystem {
            config.use_filesystem = true;
        }
        if self.verify {
            config.verify_listing = true;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn exit_status(err: &anyhow::Error) -> u8 {
    let kind = err
        .chain()
        .find_map(|e| e.downcast_ref::<keyshelf::Error>());
    match kind {
        Some(keyshelf::Error::NotFound(_)) => EXIT_NOT_FOUND,
        Some(keyshelf::Error::EnumerationUnsupported(_)) => EXIT_UNSUPPORTED,
        _ => EXIT_FAILURE,
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let operation = cli.operation();
    if operation.needs_credential() && (cli.service.is_none() || cli.variable.is_none()) {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "--service and --variable are required for set/get/delete operations",
            )
            .exit();
    }

    let paths = Paths::new();
    let config = cli.apply(Config::load(&paths)?);
    let mut service =
        CredentialService::open(&config, &paths).context("Failed to open credential store")?;

    match operation {
        Operation::Set => cmd_set(&mut service, cli),
        Operation::Get => cmd_get(&mut service, cli),
        Operation::Delete => cmd_delete(&mut service, cli),
        Operation::List => cmd_list(&mut service, cli),
        Operation::ListPrefixes => cmd_list_prefixes(&mut service, cli),
        Operation::DeletePrefix => cmd_delete_prefix(&mut service, cli),
    }
}

fn credential_key(service: &CredentialService, cli: &Cli) -> Result<CredentialKey> {
    let key = service.key(
        cli.service.as_deref().unwrap_or_default(),
        cli.variable.as_deref().unwrap_or_default(),
    )?;
    Ok(key)
}

/// Store a credential
fn cmd_set(service: &mut CredentialService, cli: &Cli) -> Result<ExitCode> {
    let key = credential_key(service, cli)?;

    let mut force = cli.force;
    if !force && service.exists(&key)? {
        let question = format!("Credential already exists for {}. Overwrite?", key.label());
        if !confirm(&question)? {
            say(cli, "Operation cancelled");
            return Ok(ExitCode::SUCCESS);
        }
        force = true;
    }

    let value = read_value(cli, &key)?;

    match service.dispatch(Request::Set { key, value, force })? {
        Response::Stored(outcome) => {
            if let Some(warning) = &outcome.index_warning {
                warn_user(cli, &format!("credential stored but not indexed: {}", warning));
            }
            say(
                cli,
                &format!("success: Credential stored for {}", outcome.key.label()),
            );
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!("unexpected response to set"),
    }
}

/// Retrieve a credential
fn cmd_get(service: &mut CredentialService, cli: &Cli) -> Result<ExitCode> {
    let key = credential_key(service, cli)?;
    let label = key.to_string();

    match service.dispatch(Request::Get { key })? {
        Response::Value(Some(value)) => {
            println!("{}", value);
            Ok(ExitCode::SUCCESS)
        }
        Response::Value(None) => Err(keyshelf::Error::NotFound(label).into()),
        _ => bail!("unexpected response to get"),
    }
}

/// Delete a credential
fn cmd_delete(service: &mut CredentialService, cli: &Cli) -> Result<ExitCode> {
    let key = credential_key(service, cli)?;
    let force = cli.force;

    match service.dispatch(Request::Delete { key, force })? {
        Response::Deleted(outcome) => {
            if let Some(warning) = &outcome.index_warning {
                warn_user(cli, &format!("credential deleted but index not updated: {}", warning));
            }
            match outcome.status {
                DeleteStatus::Deleted => say(
                    cli,
                    &format!("success: Credential deleted for {}", outcome.key.label()),
                ),
                DeleteStatus::Absent => warn_user(
                    cli,
                    &format!("no credential stored for {}", outcome.key.label()),
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!("unexpected response to delete"),
    }
}

/// List credentials under the prefix
fn cmd_list(service: &mut CredentialService, cli: &Cli) -> Result<ExitCode> {
    let prefix = service.default_prefix().to_string();

    let listing = match service.dispatch(Request::List {
        prefix: prefix.clone(),
    })? {
        Response::Credentials(listing) => listing,
        _ => bail!("unexpected response to list"),
    };

    if cli.json {
        let credentials: Vec<_> = listing
            .items
            .iter()
            .map(|(s, v)| json!({ "service": s, "variable": v }))
            .collect();
        let doc = json!({
            "prefix": prefix,
            "credentials": credentials,
            "skipped": listing.skipped,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(ExitCode::SUCCESS);
    }

    report_skipped(cli, &listing);

    if cli.quiet {
        for (s, v) in &listing.items {
            println!("{}/{}", s, v);
        }
    } else if listing.is_empty() {
        println!("No credentials found for prefix '{}'", prefix);
    } else {
        println!("Credentials for prefix '{}':", prefix);
        for (s, v) in &listing.items {
            println!("  • {}/{}", s, v);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// List every prefix in use
fn cmd_list_prefixes(service: &mut CredentialService, cli: &Cli) -> Result<ExitCode> {
    let listing = match service.dispatch(Request::ListPrefixes)? {
        Response::Prefixes(listing) => listing,
        _ => bail!("unexpected response to list-prefixes"),
    };

    if cli.json {
        let doc = json!({
            "prefixes": listing.items,
            "skipped": listing.skipped,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(ExitCode::SUCCESS);
    }

    report_skipped(cli, &listing);

    if cli.quiet {
        for prefix in &listing.items {
            println!("{}", prefix);
        }
    } else if listing.is_empty() {
        println!("No prefixes found");
    } else {
        println!("Discovered prefixes:");
        for prefix in &listing.items {
            println!("  • {}", prefix);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Delete every credential under the prefix
fn cmd_delete_prefix(service: &mut CredentialService, cli: &Cli) -> Result<ExitCode> {
    let prefix = service.default_prefix().to_string();

    if !cli.force {
        let question = format!(
            "This will delete ALL credentials with prefix '{}'. Are you sure?",
            prefix
        );
        if !confirm(&question)? {
            say(cli, "Operation cancelled");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let summary = match service.dispatch(Request::DeletePrefix {
        prefix: prefix.clone(),
    })? {
        Response::Batch(summary) => summary,
        _ => bail!("unexpected response to delete-prefix"),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for skipped in &summary.skipped {
            warn_user(cli, &format!("skipped unreadable entry '{}': {}", skipped.raw, skipped.reason));
        }
        for failure in &summary.failed {
            eprintln!("error: could not delete {}: {}", failure.credential, failure.error);
        }
        if let Some(warning) = &summary.index_warning {
            warn_user(cli, &format!("index not updated: {}", warning));
        }
        say(
            cli,
            &format!(
                "Deleted {} credentials with prefix '{}' ({} already absent, {} failed)",
                summary.succeeded(),
                prefix,
                summary.absent.len(),
                summary.failed.len()
            ),
        );
    }

    if !summary.is_clean() {
        bail!(
            "{} credential(s) under prefix '{}' could not be deleted",
            summary.failed.len(),
            prefix
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// Obtain the value to store: --value, --stdin, or a hidden prompt
fn read_value(cli: &Cli, key: &CredentialKey) -> Result<String> {
    if let Some(value) = &cli.value {
        return Ok(value.clone());
    }

    if cli.stdin {
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read credential from stdin")?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }

    let value = rpassword::prompt_password(format!("Enter credential for {}: ", key.label()))
        .context("Failed to read credential")?;

    if !cli.force {
        let again = rpassword::prompt_password("Confirm credential: ")
            .context("Failed to read credential confirmation")?;
        if value != again {
            bail!("Credentials do not match");
        }
    }

    Ok(value)
}

/// Ask a yes/no question on the terminal, defaulting to no
fn confirm(question: &str) -> Result<bool> {
    eprint!("{} (y/N): ", question);
    io::stderr().flush()?;

    let mut response = String::new();
    io::stdin()
        .lock()
        .read_line(&mut response)
        .context("Failed to read confirmation")?;

    Ok(is_yes(&response))
}

fn is_yes(response: &str) -> bool {
    matches!(response.trim().to_lowercase().as_str(), "y" | "yes")
}

fn report_skipped<T: Ord>(cli: &Cli, listing: &Listing<T>) {
    for skipped in &listing.skipped {
        warn_user(
            cli,
            &format!("skipped unreadable entry '{}': {}", skipped.raw, skipped.reason),
        );
    }
}

fn say(cli: &Cli, message: &str) {
    if !cli.quiet {
        println!("{}", message);
    }
}

fn warn_user(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("warning: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from([
            "keyshelf", "--set", "-s", "github", "-v", "token", "-p", "myapp", "--force",
        ])
        .unwrap();
        assert_eq!(cli.operation(), Operation::Set);
        assert_eq!(cli.service.as_deref(), Some("github"));
        assert_eq!(cli.variable.as_deref(), Some("token"));
        assert_eq!(cli.prefix.as_deref(), Some("myapp"));
        assert!(cli.force);

        let cli = Cli::try_parse_from(["keyshelf", "--list-prefixes", "--use-filesystem"]).unwrap();
        assert_eq!(cli.operation(), Operation::ListPrefixes);
        assert!(cli.use_filesystem);

        let cli = Cli::try_parse_from(["keyshelf", "--delete-prefix", "-p", "old", "-f"]).unwrap();
        assert_eq!(cli.operation(), Operation::DeletePrefix);
    }

    #[test]
    fn test_operations_are_exclusive_and_required() {
        assert!(Cli::try_parse_from(["keyshelf", "--get", "--set"]).is_err());
        assert!(Cli::try_parse_from(["keyshelf", "-s", "github"]).is_err());
    }

    #[test]
    fn test_value_sources_conflict() {
        assert!(Cli::try_parse_from(["keyshelf", "--set", "--value", "x", "--stdin"]).is_err());
    }

    #[test]
    fn test_backend_flag() {
        let cli = Cli::try_parse_from(["keyshelf", "--list", "--backend", "vault"]).unwrap();
        assert_eq!(cli.backend, Some(BackendKind::Vault));
        assert!(Cli::try_parse_from(["keyshelf", "--list", "--backend", "cloud"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "keyshelf", "--list", "-p", "dev", "--use-filesystem", "--verify", "--backend", "keychain",
        ])
        .unwrap();
        let config = cli.apply(Config::default());
        assert_eq!(config.default_prefix, "dev");
        assert!(config.use_filesystem);
        assert!(config.verify_listing);
        assert_eq!(config.backend, BackendKind::Keychain);

        let cli = Cli::try_parse_from(["keyshelf", "--list"]).unwrap();
        assert_eq!(cli.apply(Config::default()), Config::default());
    }

    #[test]
    fn test_needs_credential() {
        assert!(Operation::Set.needs_credential());
        assert!(Operation::Get.needs_credential());
        assert!(Operation::Delete.needs_credential());
        assert!(!Operation::List.needs_credential());
        assert!(!Operation::DeletePrefix.needs_credential());
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }

    #[test]
    fn test_exit_codes() {
        let err: anyhow::Error = keyshelf::Error::NotFound("x".into()).into();
        assert_eq!(exit_status(&err), EXIT_NOT_FOUND);

        let err = anyhow::Error::from(keyshelf::Error::EnumerationUnsupported("x".into()))
            .context("listing");
        assert_eq!(exit_status(&err), EXIT_UNSUPPORTED);

        let err = anyhow::anyhow!("boom");
        assert_eq!(exit_status(&err), EXIT_FAILURE);
    }
}
