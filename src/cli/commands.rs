//! CLI command implementations.
//!
//! Contains the business logic for each CLI command. Commands return their
//! formatted output; `ask` additionally streams answer text to stdout while
//! the turn runs.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::agent::{
    AgentConfig, CanonicalEvent, LlmSummarizer, PromptSet, ProviderPool, TurnController,
    tool_notification,
};
use crate::cli::output::{OutputFormat, format_history, format_search, format_status};
use crate::cli::parser::{Cli, Commands, ScopeArgs};
use crate::core::{ConversationTurn, KnowledgeScopes, Language, MessageDocument, ScopePreference};
use crate::error::{CommandError, Error, Result, StorageError};
use crate::history::{HistoryStore, RollingSummary, SummaryUpdater};
use crate::retrieval::{
    ExtractiveSummarizer, RetrievalConfig, RetrievalCoordinator, SearchParams, Summarize,
};
use crate::storage::SqliteStore;

/// Thread id used for one-off CLI searches.
const SEARCH_THREAD: &str = "cli-search";

/// Parameters for the ask command.
#[derive(Debug, Clone)]
pub struct AskParams<'a> {
    /// The user utterance.
    pub utterance: &'a str,
    /// Knowledge scopes.
    pub scope: &'a ScopeArgs,
    /// Conversation thread.
    pub thread: &'a str,
    /// Reply language.
    pub language: Language,
    /// Enabled tools; empty means all.
    pub tools: &'a [String],
    /// Prompt override directory.
    pub prompt_dir: Option<&'a Path>,
}

/// Executes the CLI command.
///
/// # Errors
///
/// Returns an error if the command fails to execute.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let db_path = cli.get_db_path();

    match &cli.command {
        Commands::Init { force } => cmd_init(&db_path, *force, format),
        Commands::Status => cmd_status(&db_path, format),
        Commands::Index { file, scope } => cmd_index(&db_path, file, scope, format),
        Commands::Search {
            query,
            scope,
            from_user,
            date_from,
            date_to,
            max_results,
            min_score,
            lang,
            extractive,
        } => {
            let params = SearchParams {
                query: query.clone(),
                from_user: from_user.clone(),
                date_from: date_from.clone(),
                date_to: date_to.clone(),
                max_results: *max_results,
                min_score: *min_score,
            };
            cmd_search(
                &db_path,
                &params,
                scope,
                Language::parse(lang),
                *extractive,
                format,
            )
        }
        Commands::Ask {
            utterance,
            scope,
            thread,
            lang,
            tools,
            prompt_dir,
        } => {
            let params = AskParams {
                utterance,
                scope,
                thread,
                language: Language::parse(lang),
                tools,
                prompt_dir: prompt_dir.as_deref(),
            };
            cmd_ask(&db_path, &params, format)
        }
        Commands::History { thread, limit } => cmd_history(&db_path, thread, *limit, format),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to create async runtime: {e}")).into()
    })
}

fn open_storage(db_path: &Path) -> Result<SqliteStore> {
    if !db_path.exists() {
        return Err(StorageError::NotInitialized {
            path: db_path.display().to_string(),
        }
        .into());
    }
    Ok(SqliteStore::open(db_path)?)
}

/// Database file plus its WAL sidecars.
fn database_files(db_path: &Path) -> Vec<PathBuf> {
    ["", "-wal", "-shm"]
        .into_iter()
        .map(|suffix| {
            let mut name = OsString::from(db_path.as_os_str());
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}

fn cmd_init(db_path: &Path, force: bool, format: OutputFormat) -> Result<String> {
    if db_path.exists() && !force {
        return Err(CommandError::ExecutionFailed(
            "Database already exists. Use --force to reinitialize.".to_string(),
        )
        .into());
    }

    if force {
        for path in database_files(db_path).iter().filter(|p| p.exists()) {
            std::fs::remove_file(path).map_err(|e| {
                CommandError::ExecutionFailed(format!("Failed to remove existing database: {e}"))
            })?;
        }
    }

    SqliteStore::open(db_path)?;

    match format {
        OutputFormat::Text => Ok(format!(
            "Initialized knowledge base at: {}\n",
            db_path.display()
        )),
        OutputFormat::Json => Ok(format.to_json(&serde_json::json!({
            "success": true,
            "path": db_path.to_string_lossy(),
            "force": force
        }))),
    }
}

fn cmd_status(db_path: &Path, format: OutputFormat) -> Result<String> {
    let store = open_storage(db_path)?;
    let (version, scopes) = runtime()?.block_on(async {
        let version = store.schema_version().await?;
        let scopes = store.scopes().await?;
        Ok::<_, StorageError>((version, scopes))
    })?;
    Ok(format_status(db_path, version, &scopes, format))
}

/// Parses JSON Lines message documents, skipping blank lines.
fn read_documents(reader: impl BufRead) -> Result<Vec<MessageDocument>> {
    let mut documents = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document: MessageDocument = serde_json::from_str(&line)
            .map_err(|e| CommandError::InvalidArgument(format!("line {}: {e}", index + 1)))?;
        documents.push(document);
    }
    Ok(documents)
}

fn cmd_index(db_path: &Path, file: &Path, scope: &str, format: OutputFormat) -> Result<String> {
    if scope.trim().is_empty() {
        return Err(CommandError::InvalidArgument("scope must not be empty".to_string()).into());
    }

    let documents = if file == Path::new("-") {
        read_documents(io::stdin().lock())?
    } else {
        let handle = std::fs::File::open(file).map_err(|e| {
            CommandError::ExecutionFailed(format!("Failed to open {}: {e}", file.display()))
        })?;
        read_documents(BufReader::new(handle))?
    };

    let store = open_storage(db_path)?;
    let indexed = runtime()?.block_on(store.insert_documents(scope, documents))?;
    info!(scope, indexed, "indexed messages");

    match format {
        OutputFormat::Text => Ok(format!("Indexed {indexed} messages into scope '{scope}'\n")),
        OutputFormat::Json => Ok(format.to_json(&serde_json::json!({
            "scope": scope,
            "indexed": indexed
        }))),
    }
}

/// Builds a turn over the scopes named on the command line.
fn turn_for(scope: &ScopeArgs, thread: &str, language: Language) -> ConversationTurn {
    let preference = if scope.groups.is_empty() {
        ScopePreference::All
    } else {
        ScopePreference::Groups {
            group_ids: scope.groups.clone(),
        }
    };
    ConversationTurn::new(scope.user, thread)
        .with_language(language)
        .with_scopes(KnowledgeScopes {
            preference,
            thread_bases: scope.scopes.clone(),
        })
}

/// Picks the summarizer for `search`: the configured model, or the
/// extractive fallback when no provider is configured.
fn search_summarizer(extractive: bool) -> (Arc<dyn Summarize>, RetrievalConfig) {
    if !extractive {
        let configured = AgentConfig::from_env()
            .and_then(|config| ProviderPool::from_config(&config).map(|pool| (pool, config)));
        match configured {
            Ok((pool, config)) => {
                let retrieval = config.retrieval.clone();
                return (Arc::new(LlmSummarizer::new(pool, config)), retrieval);
            }
            Err(e) => debug!(error = %e, "no provider configured, using extractive summaries"),
        }
    }
    (Arc::new(ExtractiveSummarizer), RetrievalConfig::from_env())
}

fn cmd_search(
    db_path: &Path,
    params: &SearchParams,
    scope: &ScopeArgs,
    language: Language,
    extractive: bool,
    format: OutputFormat,
) -> Result<String> {
    let store = open_storage(db_path)?;
    let (summarizer, config) = search_summarizer(extractive);
    let coordinator = Arc::new(RetrievalCoordinator::new(
        Arc::new(store),
        summarizer,
        config,
    ));
    let turn = turn_for(scope, SEARCH_THREAD, language);

    let result = runtime()?.block_on(async {
        let _guard = coordinator.begin_turn(turn.turn_id);
        coordinator.get_or_fetch_result(&turn, params).await
    });
    Ok(format_search(&params.query, &result, format))
}

fn cmd_ask(db_path: &Path, params: &AskParams<'_>, format: OutputFormat) -> Result<String> {
    let config = AgentConfig::from_env().map_err(|e| {
        CommandError::ExecutionFailed(format!("Agent configuration error: {e}"))
    })?;
    let pool = ProviderPool::from_config(&config).map_err(|e| {
        CommandError::ExecutionFailed(format!("Provider creation failed: {e}"))
    })?;

    let store = open_storage(db_path)?;
    let history: Arc<dyn HistoryStore> = Arc::new(store.clone());
    let coordinator = Arc::new(RetrievalCoordinator::new(
        Arc::new(store),
        Arc::new(LlmSummarizer::new(pool.clone(), config.clone())),
        config.retrieval.clone(),
    ));
    let rolling = RollingSummary::new(
        Arc::clone(&history),
        LlmSummarizer::new(pool.clone(), config.clone()),
    );
    let controller = Arc::new(
        TurnController::new(pool, coordinator, history, config)
            .with_prompts(PromptSet::load(params.prompt_dir)),
    );

    let turn = turn_for(params.scope, params.thread, params.language)
        .with_tools(params.tools.to_vec());
    let thread = turn.thread_id.clone();
    let language = turn.language;

    let outcome = runtime()?.block_on(async {
        let mut handle = controller.start(turn, params.utterance);
        let mut stdout = io::stdout().lock();
        while let Some(event) = handle.events.next().await {
            match event {
                CanonicalEvent::TextDelta(text) if format == OutputFormat::Text => {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                CanonicalEvent::ToolStarted(name) if format == OutputFormat::Text => {
                    let _ = writeln!(io::stderr(), "{}", tool_notification(&name));
                }
                _ => {}
            }
        }
        drop(stdout);

        let outcome = handle.outcome.await.map_err(|e| {
            CommandError::ExecutionFailed(format!("Turn task failed: {e}"))
        })?;
        if !outcome.cancelled
            && let Err(e) = rolling.update(&thread, language).await
        {
            warn!(thread, error = %e, "conversation summary update failed");
        }
        Ok::<_, Error>(outcome)
    })?;

    match format {
        OutputFormat::Text => Ok("\n".to_string()),
        OutputFormat::Json => Ok(format.to_json(&serde_json::json!({
            "thread": thread,
            "text": outcome.text,
            "path": outcome.path,
            "provider_error": outcome.provider_error.as_ref().map(ToString::to_string),
            "cancelled": outcome.cancelled
        }))),
    }
}

fn cmd_history(db_path: &Path, thread: &str, limit: usize, format: OutputFormat) -> Result<String> {
    let store = open_storage(db_path)?;
    let entries = runtime()?.block_on(store.read_last(thread, limit))?;
    Ok(format_history(thread, &entries, format))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXPORT: &str = r#"{"message_id":"-1001234_1","sender_name":"alice","message_text":"release planned for friday","message_date":"2025-03-03T10:00:00Z","group_id":"-1001234"}

{"message_id":"-1001234_2","sender_name":"bob","message_text":"release notes drafted","message_date":"2025-03-04T11:30:00Z"}
{"message_id":"-1001234_3","sender_name":"carol","message_text":"lunch?"}
"#;

    fn setup() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let db_path = temp_dir.path().join("test.db");
        (temp_dir, db_path)
    }

    fn indexed() -> (TempDir, PathBuf) {
        let (temp_dir, db_path) = setup();
        cmd_init(&db_path, false, OutputFormat::Text).unwrap_or_else(|e| panic!("init: {e}"));
        let export = temp_dir.path().join("export.jsonl");
        std::fs::write(&export, EXPORT).unwrap_or_else(|e| panic!("write: {e}"));
        cmd_index(&db_path, &export, "team-kb", OutputFormat::Text)
            .unwrap_or_else(|e| panic!("index: {e}"));
        (temp_dir, db_path)
    }

    fn team_scope() -> ScopeArgs {
        ScopeArgs {
            scopes: vec!["team-kb".to_string()],
            ..ScopeArgs::default()
        }
    }

    #[test]
    fn test_cmd_init() {
        let (_temp_dir, db_path) = setup();
        let result = cmd_init(&db_path, false, OutputFormat::Text);
        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_cmd_init_already_exists() {
        let (_temp_dir, db_path) = setup();
        cmd_init(&db_path, false, OutputFormat::Text).unwrap_or_else(|e| panic!("init: {e}"));

        assert!(cmd_init(&db_path, false, OutputFormat::Text).is_err());
        assert!(cmd_init(&db_path, true, OutputFormat::Text).is_ok());
    }

    #[test]
    fn test_uninitialized_database_rejected() {
        let (_temp_dir, db_path) = setup();
        let err = cmd_status(&db_path, OutputFormat::Text)
            .err()
            .unwrap_or_else(|| panic!("status should fail"));
        assert!(err.to_string().contains("kb-chat init"));
    }

    #[test]
    fn test_read_documents_reports_line() {
        let input = "{\"message_id\":\"1\",\"sender_name\":\"a\",\"message_text\":\"x\"}\nnot json\n";
        let err = read_documents(input.as_bytes())
            .err()
            .unwrap_or_else(|| panic!("should fail"));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_index_then_status() {
        let (_temp_dir, db_path) = indexed();
        let status = cmd_status(&db_path, OutputFormat::Text)
            .unwrap_or_else(|e| panic!("status: {e}"));
        assert!(status.contains("team-kb"));
        assert!(status.contains('3'));
    }

    #[test]
    fn test_search_renders_cards() {
        let (_temp_dir, db_path) = indexed();
        let output = cmd_search(
            &db_path,
            &SearchParams::text("release"),
            &team_scope(),
            Language::En,
            true,
            OutputFormat::Json,
        )
        .unwrap_or_else(|e| panic!("search: {e}"));
        let value: serde_json::Value =
            serde_json::from_str(&output).unwrap_or_else(|e| panic!("json: {e}"));
        assert_eq!(value["total"], 2);
        assert!(
            value["rendered"]
                .as_str()
                .unwrap_or_default()
                .contains("https://t.me/c/1234/1")
        );
    }

    #[test]
    fn test_search_unknown_scope_is_empty() {
        let (_temp_dir, db_path) = indexed();
        let scope = ScopeArgs {
            user: 99,
            ..ScopeArgs::default()
        };
        let output = cmd_search(
            &db_path,
            &SearchParams::text("release"),
            &scope,
            Language::En,
            true,
            OutputFormat::Text,
        )
        .unwrap_or_else(|e| panic!("search: {e}"));
        assert!(output.contains(crate::retrieval::NO_RESULTS));
    }

    #[test]
    fn test_turn_for_groups_preference() {
        let scope = ScopeArgs {
            user: 5,
            groups: vec![-1001],
            scopes: vec!["team-kb".to_string()],
        };
        let turn = turn_for(&scope, "t", Language::Ru);
        assert_eq!(turn.user_id, 5);
        assert_eq!(turn.language, Language::Ru);
        assert_eq!(
            turn.scopes.preference,
            ScopePreference::Groups {
                group_ids: vec![-1001]
            }
        );
        assert_eq!(turn.scopes.thread_bases, vec!["team-kb"]);
    }

    #[test]
    fn test_history_empty_thread() {
        let (_temp_dir, db_path) = indexed();
        let output = cmd_history(&db_path, "nobody", 10, OutputFormat::Text)
            .unwrap_or_else(|e| panic!("history: {e}"));
        assert!(output.contains("No history"));
    }
}
