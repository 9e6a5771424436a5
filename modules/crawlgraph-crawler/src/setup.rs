//! Interactive credential setup behind `crawlgraph setup` and
//! `crawlgraph reset`. Reads answers line by line so tests can script it.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crawlgraph_common::{CredentialKey, CredentialStore, ServiceTarget};
use social_client::Session;

/// Prompt for every credential `target` covers and persist the answers.
pub fn setup<R: BufRead, W: Write>(
    target: ServiceTarget,
    store: &CredentialStore,
    sessions_dir: &Path,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    if target.includes(ServiceTarget::Accounts) {
        setup_accounts(store, sessions_dir, input, output)?;
    }
    if target.includes(ServiceTarget::Neo4j) {
        let uri = ask_required(input, output, "Neo4j URI (e.g. bolt://localhost:7687): ")?;
        let user = ask_required(input, output, "Neo4j user: ")?;
        let password = ask_required(input, output, "Neo4j password: ")?;
        store.set(CredentialKey::Neo4jUri, &uri)?;
        store.set(CredentialKey::Neo4jUser, &user)?;
        store.set(CredentialKey::Neo4jPassword, &password)?;
    }
    if target.includes(ServiceTarget::Analyzer) {
        let key = ask(input, output, "Analyzer API key (Enter to skip analysis): ")?;
        if !key.is_empty() {
            store.set(CredentialKey::AnalyzerApiKey, &key)?;
        }
    }
    if target.includes(ServiceTarget::UserAgent) {
        let agent = ask(input, output, "Source user agent (Enter for the built-in default): ")?;
        if !agent.is_empty() {
            store.set(CredentialKey::SourceUserAgent, &agent)?;
        }
    }
    info!(path = %store.path().display(), "Credentials saved");
    Ok(())
}

/// Clear the target's credentials (and session files when accounts are
/// included), then set them up again.
pub fn reset<R: BufRead, W: Write>(
    target: ServiceTarget,
    store: &CredentialStore,
    sessions_dir: &Path,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    if target.includes(ServiceTarget::Accounts) {
        for account in store.snapshot()?.source_accounts {
            if Session::remove(sessions_dir, &account)? {
                info!(account = account.as_str(), "Removed session");
            }
        }
    }
    store.reset(target.keys())?;
    info!(target = ?target, "Credentials cleared");
    setup(target, store, sessions_dir, input, output)
}

fn setup_accounts<R: BufRead, W: Write>(
    store: &CredentialStore,
    sessions_dir: &Path,
    input: &mut R,
    output: &mut W,
) -> Result<()> {
    loop {
        let username = ask(input, output, "Source account username (Enter to finish): ")?;
        if username.is_empty() {
            if store.snapshot()?.source_accounts.is_empty() {
                writeln!(output, "At least one account is required.")?;
                continue;
            }
            break;
        }
        let token = ask_required(input, output, &format!("Session token for {username}: "))?;
        let path = Session::new(&username, &token)
            .save(sessions_dir)
            .with_context(|| format!("Failed to save session for {username}"))?;
        store.add_account(&username)?;
        writeln!(output, "Saved session to {}", path.display())?;
    }

    let creds = store.snapshot()?;
    if creds.source_accounts.len() > 1 {
        writeln!(output, "Accounts: {}", creds.source_accounts.join(", "))?;
        loop {
            let choice = ask(
                input,
                output,
                &format!("Default account [{}]: ", creds.default_source_account),
            )?;
            if choice.is_empty() {
                break;
            }
            if creds.source_accounts.contains(&choice) {
                store.set(CredentialKey::DefaultSourceAccount, &choice)?;
                break;
            }
            writeln!(output, "{choice} is not a configured account.")?;
        }
    }
    Ok(())
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("input closed before setup finished");
    }
    Ok(line.trim().to_string())
}

fn ask_required<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> Result<String> {
    loop {
        let answer = ask(input, output, question)?;
        if !answer.is_empty() {
            return Ok(answer);
        }
        writeln!(output, "A value is required.")?;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn run(
        f: fn(ServiceTarget, &CredentialStore, &Path, &mut Cursor<Vec<u8>>, &mut Vec<u8>) -> Result<()>,
        target: ServiceTarget,
        store: &CredentialStore,
        sessions: &Path,
        script: &str,
    ) -> Result<String> {
        let mut input = Cursor::new(script.as_bytes().to_vec());
        let mut output = Vec::new();
        f(target, store, sessions, &mut input, &mut output)?;
        Ok(String::from_utf8(output).unwrap())
    }

    #[test]
    fn accounts_setup_saves_sessions_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credentials.json")).unwrap();
        let sessions = dir.path().join("sessions");

        run(setup, ServiceTarget::Accounts, &store, &sessions, "alice\ntok-a\nbob\ntok-b\n\nbob\n")
            .unwrap();

        let creds = store.snapshot().unwrap();
        assert_eq!(creds.source_accounts, vec!["alice", "bob"]);
        assert_eq!(creds.default_source_account, "bob");
        assert_eq!(Session::load(&sessions, "alice").unwrap().token, "tok-a");
    }

    #[test]
    fn empty_account_list_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credentials.json")).unwrap();
        let out = run(setup, ServiceTarget::Accounts, &store, dir.path(), "\nalice\ntok\n\n").unwrap();
        assert!(out.contains("At least one account is required."));
        assert_eq!(store.snapshot().unwrap().source_accounts, vec!["alice"]);
    }

    #[test]
    fn optional_keys_can_be_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credentials.json")).unwrap();
        run(setup, ServiceTarget::Analyzer, &store, dir.path(), "\n").unwrap();
        assert_eq!(store.get(CredentialKey::AnalyzerApiKey).unwrap(), "");

        run(setup, ServiceTarget::Neo4j, &store, dir.path(), "bolt://db:7687\nneo4j\n\nsecret\n")
            .unwrap();
        let creds = store.snapshot().unwrap();
        assert_eq!(creds.neo4j_uri, "bolt://db:7687");
        assert_eq!(creds.neo4j_password, "secret");
    }

    #[test]
    fn reset_removes_sessions_and_reprompts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credentials.json")).unwrap();
        let sessions = dir.path().join("sessions");
        run(setup, ServiceTarget::Accounts, &store, &sessions, "alice\ntok\n\n").unwrap();
        store.set(CredentialKey::AnalyzerApiKey, "sk-1").unwrap();

        run(reset, ServiceTarget::Accounts, &store, &sessions, "carol\ntok-c\n\n").unwrap();

        let creds = store.snapshot().unwrap();
        assert_eq!(creds.source_accounts, vec!["carol"]);
        assert_eq!(creds.default_source_account, "carol");
        assert_eq!(creds.analyzer_api_key, "sk-1");
        assert!(Session::load(&sessions, "alice").is_err());
    }

    #[test]
    fn closed_input_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credentials.json")).unwrap();
        assert!(run(setup, ServiceTarget::Neo4j, &store, dir.path(), "bolt://x\n").is_err());
    }
}
