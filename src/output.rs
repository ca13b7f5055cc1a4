//! Output records and the freezing state machine.
//!
//! A record is either *live* (backed by a replayable closure that can
//! re-render into a fresh anchor) or *frozen* (reduced to a static snapshot
//! that survives serialization). Freezing is one-way; a frozen record never
//! regains an executable payload.

use crate::error::{ExecutionErrorKind, ScriptError};
use crate::types::{CellId, MimeType};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Placeholder shown by environments that cannot execute a live record.
pub const TEXT_PLACEHOLDER: &str = "<nbrequire display object>";

/// Private DOM anchor an invocation renders into.
///
/// The host maps this onto an actual element; inside the engine it is the
/// markup buffer a script writes and freezing reads.
#[derive(Clone, Default)]
pub struct Anchor {
    html: Arc<RwLock<String>>,
}

impl Anchor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_html(&self, html: impl Into<String>) {
        *self.html.write() = html.into();
    }

    pub fn append_html(&self, html: &str) {
        self.html.write().push_str(html);
    }

    pub fn html(&self) -> String {
        self.html.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.html.read().is_empty()
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anchor").field("html", &self.html()).finish()
    }
}

/// Output context a record is bound to: the owning cell plus its anchor.
#[derive(Debug, Clone)]
pub struct OutputContext {
    pub cell: CellId,
    pub anchor: Anchor,
}

impl OutputContext {
    pub fn new(cell: CellId) -> Self {
        Self {
            cell,
            anchor: Anchor::new(),
        }
    }
}

/// Replayable invocation held by a live record: re-executes the original
/// script against the given context's anchor. Takes the context by value so
/// the returned future owns everything it renders into.
pub type ReplayFn =
    Arc<dyn Fn(OutputContext) -> BoxFuture<'static, Result<(), ScriptError>> + Send + Sync>;

/// One MIME-typed rendering payload.
#[derive(Clone)]
pub enum Payload {
    /// Executable closure. Only a live record may hold one.
    Executable(ReplayFn),
    /// Static markup or text.
    Static(String),
}

impl Payload {
    pub fn as_static(&self) -> Option<&str> {
        match self {
            Payload::Static(s) => Some(s),
            Payload::Executable(_) => None,
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, Payload::Executable(_))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Executable(_) => f.write_str("Payload::Executable(..)"),
            Payload::Static(s) => f.debug_tuple("Payload::Static").field(s).finish(),
        }
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Live,
    Frozen,
}

/// One unit of captured cell output.
#[derive(Debug, Clone)]
pub struct OutputRecord {
    kind: RecordKind,
    renderings: BTreeMap<MimeType, Payload>,
    /// Whether the javascript payload was ever invoked.
    executed: bool,
    /// Markup buffer of the invocation that produced this record.
    /// Live records only; freezing snapshots it.
    anchor: Option<Anchor>,
}

impl OutputRecord {
    /// Create a live record around a replay closure and its anchor.
    pub fn live(replay: ReplayFn, anchor: Anchor) -> Self {
        let mut renderings = BTreeMap::new();
        renderings.insert(MimeType::Javascript, Payload::Executable(replay));
        renderings.insert(
            MimeType::Text,
            Payload::Static(TEXT_PLACEHOLDER.to_string()),
        );
        Self {
            kind: RecordKind::Live,
            renderings,
            executed: false,
            anchor: Some(anchor),
        }
    }

    /// Create a frozen record directly from static markup.
    pub fn frozen(html: impl Into<String>) -> Self {
        let html = html.into();
        let mut renderings = BTreeMap::new();
        renderings.insert(MimeType::Html, Payload::Static(html.clone()));
        renderings.insert(MimeType::Text, Payload::Static(html));
        Self {
            kind: RecordKind::Frozen,
            renderings,
            executed: false,
            anchor: None,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn is_frozen(&self) -> bool {
        self.kind == RecordKind::Frozen
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    pub fn mark_executed(&mut self) {
        self.executed = true;
    }

    pub fn rendering(&self, mime: MimeType) -> Option<&Payload> {
        self.renderings.get(&mime)
    }

    /// Whether this record still holds an invokable closure.
    pub fn has_executable(&self) -> bool {
        self.renderings.values().any(Payload::is_executable)
    }

    /// Current markup: the anchor buffer for live records, the static
    /// snapshot for frozen ones.
    pub fn current_html(&self) -> Option<String> {
        if let Some(anchor) = &self.anchor {
            return Some(anchor.html());
        }
        self.renderings
            .get(&MimeType::Html)
            .and_then(|p| p.as_static().map(str::to_string))
    }

    /// Freeze this record: snapshot the rendered markup as the static
    /// `Html`/`Text` payloads, discard the executable closure, set the
    /// kind to frozen. Idempotent; a frozen record is left untouched.
    pub fn freeze(&mut self) {
        if self.kind == RecordKind::Frozen {
            return;
        }

        let snapshot = self.current_html();

        self.renderings.remove(&MimeType::Javascript);
        match snapshot {
            Some(html) if !html.is_empty() => {
                self.renderings
                    .insert(MimeType::Html, Payload::Static(html.clone()));
                self.renderings.insert(MimeType::Text, Payload::Static(html));
            }
            _ => {
                // Nothing was rendered; keep the placeholder text.
                self.renderings
                    .entry(MimeType::Text)
                    .or_insert_with(|| Payload::Static(TEXT_PLACEHOLDER.to_string()));
            }
        }
        self.anchor = None;
        self.kind = RecordKind::Frozen;
    }

    /// Restore this record into a fresh output context.
    ///
    /// Frozen records append their static payload without invoking anything.
    /// A live record surviving a reload is re-executed through its replay
    /// invocation, falling back to the text placeholder if the closure is
    /// missing or the re-execution fails.
    pub async fn restore(&mut self, ctx: &OutputContext) -> RestoreDisposition {
        match self.kind {
            RecordKind::Frozen => {
                if let Some(html) = self
                    .renderings
                    .get(&MimeType::Html)
                    .and_then(|p| p.as_static())
                {
                    ctx.anchor.append_html(html);
                }
                RestoreDisposition::Frozen
            }
            RecordKind::Live => {
                let replay = match self.renderings.get(&MimeType::Javascript) {
                    Some(Payload::Executable(f)) => Some(Arc::clone(f)),
                    _ => None,
                };
                if let Some(f) = replay {
                    if f(ctx.clone()).await.is_ok() {
                        self.executed = true;
                        return RestoreDisposition::Replayed;
                    }
                }
                let placeholder = self
                    .renderings
                    .get(&MimeType::Text)
                    .and_then(|p| p.as_static())
                    .unwrap_or(TEXT_PLACEHOLDER);
                ctx.anchor.append_html(placeholder);
                RestoreDisposition::Placeholder
            }
        }
    }
}

/// How a record was brought back during restoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreDisposition {
    /// Static snapshot appended verbatim.
    Frozen,
    /// Live closure re-rendered successfully.
    Replayed,
    /// Closure missing or failed; placeholder text shown instead.
    Placeholder,
}

/// Persisted representation of an [`OutputRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRecord {
    kind: RecordKind,
    executed: bool,
    frozen: bool,
    data: BTreeMap<MimeType, String>,
}

impl Serialize for OutputRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let data = self
            .renderings
            .iter()
            .filter_map(|(mime, payload)| {
                payload.as_static().map(|s| (*mime, s.to_string()))
            })
            .collect();
        PersistedRecord {
            kind: self.kind,
            executed: self.executed,
            frozen: self.kind == RecordKind::Frozen,
            data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OutputRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let persisted = PersistedRecord::deserialize(deserializer)?;
        let renderings = persisted
            .data
            .into_iter()
            .map(|(mime, s)| (mime, Payload::Static(s)))
            .collect();
        Ok(Self {
            kind: persisted.kind,
            renderings,
            executed: persisted.executed,
            anchor: None,
        })
    }
}

/// Structured error output appended to a cell when an execution fails.
///
/// The `ename` tag distinguishes engine errors from host-runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub ename: String,
    pub kind: ExecutionErrorKind,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl ErrorOutput {
    pub const ENAME: &'static str = "RequireError";

    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            ename: Self::ENAME.to_string(),
            kind,
            evalue: message.into(),
            traceback: Vec::new(),
        }
    }

    pub fn with_traceback(
        kind: ExecutionErrorKind,
        message: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        Self {
            ename: Self::ENAME.to_string(),
            kind,
            evalue: message.into(),
            traceback,
        }
    }
}

/// One entry in a cell's output list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum CellOutput {
    DisplayData(OutputRecord),
    Error(ErrorOutput),
}

impl CellOutput {
    pub fn as_record(&self) -> Option<&OutputRecord> {
        match self {
            CellOutput::DisplayData(record) => Some(record),
            CellOutput::Error(_) => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut OutputRecord> {
        match self {
            CellOutput::DisplayData(record) => Some(record),
            CellOutput::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorOutput> {
        match self {
            CellOutput::Error(err) => Some(err),
            CellOutput::DisplayData(_) => None,
        }
    }
}
