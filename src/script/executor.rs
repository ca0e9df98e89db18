//! Script execution.
//!
//! `ScriptExecutor` drives a [`Connection`] through one script at a time:
//! it splits the script into statements, executes them in order, walks every
//! result they produce and reports progress to the registered observers.

use super::observer::{ObserverId, ObserverRegistry, ScriptObserver};
use super::splitter::{script_lines, SplitEvent, StatementSplitter, DEFAULT_DELIMITER, LINE_SEPARATOR};
use crate::db::{Connection, RowHandle, Statement, Warning};
use crate::error::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info};

/// Executor settings, loadable from the `[runner]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorOptions {
    /// Abort the run on the first failing statement.
    pub stop_on_error: bool,

    /// Treat driver warnings as statement failures.
    pub throw_warning: bool,

    /// Autocommit mode applied to the connection at run start.
    pub auto_commit: bool,

    /// Send the whole script as one execution unit.
    pub send_full_script: bool,

    /// Normalize `\r\n` to `\n` before executing.
    pub remove_crs: bool,

    /// Driver-side escape substitution.
    pub escape_processing: bool,

    /// Statement terminator.
    pub delimiter: String,

    /// Require the delimiter to be alone on its line.
    pub full_line_delimiter: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            throw_warning: false,
            auto_commit: false,
            send_full_script: false,
            remove_crs: false,
            escape_processing: true,
            delimiter: DEFAULT_DELIMITER.to_string(),
            full_line_delimiter: false,
        }
    }
}

/// Final counters and timing of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Statements that executed without error.
    pub success_count: u64,

    /// Statements that failed because of a driver warning.
    pub warning_count: u64,

    /// Statements that failed to execute.
    pub error_count: u64,

    /// Wall-clock time of the run.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl RunSummary {
    /// Number of statements that reached an outcome.
    pub fn total(&self) -> u64 {
        self.success_count + self.warning_count + self.error_count
    }

    /// Returns true if any statement failed.
    pub fn has_failures(&self) -> bool {
        self.warning_count + self.error_count > 0
    }
}

/// Run-scoped counters and timing.
struct RunState {
    success_count: u64,
    warning_count: u64,
    error_count: u64,
    started: Instant,
}

impl RunState {
    fn start() -> Self {
        Self {
            success_count: 0,
            warning_count: 0,
            error_count: 0,
            started: Instant::now(),
        }
    }

    fn finish(&self) -> RunSummary {
        RunSummary {
            success_count: self.success_count,
            warning_count: self.warning_count,
            error_count: self.error_count,
            duration: self.started.elapsed(),
        }
    }
}

/// What happened to a statement whose failure did not abort the run.
#[derive(Debug)]
enum StatementOutcome {
    Succeeded,
    Failed(ScriptError),
}

/// Why a single statement failed.
enum StatementFailure {
    Warning(Warning),
    Database(ScriptError),
}

impl From<ScriptError> for StatementFailure {
    fn from(err: ScriptError) -> Self {
        Self::Database(err)
    }
}

/// Executes SQL scripts against a connection.
///
/// The executor keeps its options and observers between runs; counters and
/// timing start from zero on every run.
pub struct ScriptExecutor<'a> {
    conn: &'a mut dyn Connection,
    options: ExecutorOptions,
    observers: ObserverRegistry,
}

impl<'a> ScriptExecutor<'a> {
    /// Creates an executor with default options.
    pub fn new(conn: &'a mut dyn Connection) -> Self {
        Self::with_options(conn, ExecutorOptions::default())
    }

    /// Creates an executor with the given options.
    pub fn with_options(conn: &'a mut dyn Connection, options: ExecutorOptions) -> Self {
        Self {
            conn,
            options,
            observers: ObserverRegistry::new(),
        }
    }

    /// Current options.
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Replaces every option at once.
    pub fn set_options(&mut self, options: ExecutorOptions) {
        self.options = options;
    }

    /// Aborts the run on the first failing statement.
    pub fn set_stop_on_error(&mut self, stop_on_error: bool) {
        self.options.stop_on_error = stop_on_error;
    }

    /// Treats driver warnings as statement failures.
    pub fn set_throw_warning(&mut self, throw_warning: bool) {
        self.options.throw_warning = throw_warning;
    }

    /// Autocommit mode applied to the connection at the start of a run.
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.options.auto_commit = auto_commit;
    }

    /// Sends the whole script as a single execution.
    pub fn set_send_full_script(&mut self, send_full_script: bool) {
        self.options.send_full_script = send_full_script;
    }

    /// Converts CRLF to LF in statements before they run.
    pub fn set_remove_crs(&mut self, remove_crs: bool) {
        self.options.remove_crs = remove_crs;
    }

    /// Driver-side escape processing for each statement.
    pub fn set_escape_processing(&mut self, escape_processing: bool) {
        self.options.escape_processing = escape_processing;
    }

    /// Delimiter each run starts with.
    pub fn set_delimiter(&mut self, delimiter: impl Into<String>) {
        self.options.delimiter = delimiter.into();
    }

    /// Only honors the delimiter when it is alone on its line.
    pub fn set_full_line_delimiter(&mut self, full_line_delimiter: bool) {
        self.options.full_line_delimiter = full_line_delimiter;
    }

    /// Registers an observer; see [`ObserverRegistry::add`].
    pub fn add_observer(&self, observer: Arc<dyn ScriptObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    /// Removes an observer registration.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Shared handle to the observer registry.
    pub fn observers(&self) -> ObserverRegistry {
        self.observers.clone()
    }

    /// Runs script text, splitting it into lines on `\n`.
    pub async fn run_script(&mut self, script: &str) -> Result<RunSummary> {
        self.run(script_lines(script)).await
    }

    /// Reads a whole script source, then runs it.
    ///
    /// A read failure is returned before the run starts, so no events fire.
    pub async fn run_reader<R>(&mut self, mut reader: R) -> Result<RunSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut script = String::new();
        reader.read_to_string(&mut script).await?;
        self.run_script(&script).await
    }

    /// Runs a script given as lines.
    ///
    /// Returns the run summary, or the fatal error that aborted the run.
    /// `end_script` is emitted either way. Statement failures that did not
    /// abort the run only show up in the summary counters.
    pub async fn run<I, S>(&mut self, lines: I) -> Result<RunSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = RunState::start();
        self.observers.notify(|o| o.begin_script());

        let outcome = self.execute_script(lines, &mut state).await;

        self.rollback_quietly().await;
        let summary = state.finish();
        self.observers.notify(|o| o.end_script(&summary));

        info!(
            successes = summary.success_count,
            warnings = summary.warning_count,
            errors = summary.error_count,
            duration_ms = summary.duration.as_millis() as u64,
            "Script finished"
        );

        outcome.map(|()| summary)
    }

    async fn execute_script<I, S>(&mut self, lines: I, state: &mut RunState) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.apply_auto_commit().await?;

        if self.options.send_full_script {
            self.execute_full_script(lines, state).await
        } else {
            self.execute_line_by_line(lines, state).await
        }
    }

    async fn execute_full_script<I, S>(&mut self, lines: I, state: &mut RunState) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut script = String::new();
        for line in lines {
            script.push_str(line.as_ref());
            script.push_str(LINE_SEPARATOR);
        }

        match self.execute_statement(script.trim(), state).await {
            Ok(StatementOutcome::Succeeded) => self.observers.notify(|o| o.success()),
            Ok(StatementOutcome::Failed(failure)) => {
                let message = failure.to_string();
                self.observers.notify(|o| o.error(&message));
            }
            Err(fatal) => {
                let message = fatal.to_string();
                self.observers.notify(|o| o.error(&message));
                return Err(fatal);
            }
        }

        self.commit().await
    }

    async fn execute_line_by_line<I, S>(&mut self, lines: I, state: &mut RunState) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut splitter =
            StatementSplitter::new(self.options.delimiter.as_str(), self.options.full_line_delimiter);

        for line in lines {
            match splitter.push_line(line.as_ref()) {
                Some(SplitEvent::Comment(text)) => self.observers.notify(|o| o.comment(&text)),
                Some(SplitEvent::Statement(command)) => {
                    self.execute_statement(&command, state).await?;
                }
                None => {}
            }
        }

        self.commit().await?;
        splitter.finish()
    }

    /// Executes one statement and drains its results.
    ///
    /// Returns `Err` only for failures that abort the run.
    async fn execute_statement(
        &mut self,
        command: &str,
        state: &mut RunState,
    ) -> Result<StatementOutcome> {
        self.observers.notify(|o| o.sql(command));
        debug!("Executing statement: {command}");

        let sql = if self.options.remove_crs {
            Cow::Owned(command.replace("\r\n", "\n"))
        } else {
            Cow::Borrowed(command)
        };

        let options = &self.options;
        let observers = &self.observers;
        let mut statement = self
            .conn
            .create_statement()
            .map_err(|e| ScriptError::statement(command, database_message(e)))?;

        let result = run_statement(&mut *statement, &sql, options, observers).await;

        if let Err(e) = statement.close().await {
            debug!("Ignoring failure to close statement: {e}");
        }
        drop(statement);

        let failure = match result {
            Ok(()) => {
                state.success_count += 1;
                return Ok(StatementOutcome::Succeeded);
            }
            Err(StatementFailure::Warning(warning)) => {
                state.warning_count += 1;
                ScriptError::warning(command, warning.to_string())
            }
            Err(StatementFailure::Database(e)) => {
                state.error_count += 1;
                ScriptError::statement(command, database_message(e))
            }
        };

        if self.options.stop_on_error {
            return Err(failure);
        }

        error!("{failure}");
        Ok(StatementOutcome::Failed(failure))
    }

    async fn apply_auto_commit(&mut self) -> Result<()> {
        let desired = self.options.auto_commit;
        let could_not_set =
            |e: ScriptError| ScriptError::config(format!("Could not set AutoCommit to {desired}. Cause: {e}"));

        if self.conn.auto_commit().map_err(could_not_set)? != desired {
            self.conn.set_auto_commit(desired).await.map_err(could_not_set)?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let auto_commit = self
            .conn
            .auto_commit()
            .map_err(|e| ScriptError::commit(e.to_string()))?;

        if !auto_commit {
            self.conn
                .commit()
                .await
                .map_err(|e| ScriptError::commit(e.to_string()))?;
        }
        Ok(())
    }

    /// Best-effort rollback; never replaces the run outcome.
    async fn rollback_quietly(&mut self) {
        match self.conn.auto_commit() {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.conn.rollback().await {
                    debug!("Ignoring rollback failure: {e}");
                }
            }
            Err(e) => debug!("Skipping rollback, autocommit state unavailable: {e}"),
        }
    }
}

/// Executes `sql` on `statement` and walks every result it produces.
async fn run_statement(
    statement: &mut dyn Statement,
    sql: &str,
    options: &ExecutorOptions,
    observers: &ObserverRegistry,
) -> std::result::Result<(), StatementFailure> {
    statement.set_escape_processing(options.escape_processing)?;

    let mut has_results = statement.execute(sql).await?;

    // The first result set is surfaced by the loop below, not here.
    if !has_results {
        if let Some(count) = statement.update_count()? {
            observers.notify(|o| o.update_count(count));
        }
    }

    while has_results || statement.update_count()?.is_some() {
        if options.throw_warning {
            if let Some(warning) = statement.warnings()? {
                return Err(StatementFailure::Warning(warning));
            }
        }
        if has_results {
            print_results(statement, observers).await;
        }
        has_results = statement.more_results().await?;
    }

    Ok(())
}

async fn print_results(statement: &mut dyn Statement, observers: &ObserverRegistry) {
    if let Err(e) = stream_result_set(statement, observers).await {
        error!("{}", ScriptError::result_printing(database_message(e)));
    }
}

async fn stream_result_set(
    statement: &mut dyn Statement,
    observers: &ObserverRegistry,
) -> Result<()> {
    let Some(mut result_set) = statement.result_set()? else {
        return Ok(());
    };

    observers.notify(|o| o.result_set(result_set.columns()));
    while result_set.next().await? {
        let row = RowHandle::new(&*result_set);
        observers.notify(|o| o.row(&row));
    }
    observers.notify(|o| o.no_more_rows());
    Ok(())
}

/// Driver message without the variant prefix.
fn database_message(err: ScriptError) -> String {
    match err {
        ScriptError::Database(message) => message,
        other => other.to_string(),
    }
}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
