//! Stateful pre-order traversal of one aligned-subtitle XML document.
//!
//! The walk runs over a quick-xml event stream and reconstructs the
//! document/sentence/word/time structure: `document` and `s` nodes update
//! the current position, `w` nodes emit word rows, paired `time` nodes emit
//! time spans, and leaves under the `meta` subtree emit metadata entries.
//! All traversal state lives in a per-file [`Traversal`] value; nothing is
//! carried across files.

use std::fmt;
use std::io::BufRead;

use anyhow::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::models::{MetaEntry, TimeSpan, WordRow};
use crate::storage::Storage;
use crate::timecode::TimeCode;
use crate::writer::Writer;

/// An `id`/`value` attribute could not be parsed into the expected shape.
/// Abandons the current file; other files in the batch continue.
#[derive(Debug, Clone)]
pub struct MalformedNodeError {
    pub file: String,
    pub node: String,
    pub reason: String,
}

impl fmt::Display for MalformedNodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed node <{}> in {}: {}",
            self.node, self.file, self.reason
        )
    }
}

impl std::error::Error for MalformedNodeError {}

/// Counters for one file's walk. Insert counters report rows actually
/// written; `duplicates` counts inserts suppressed by the natural key.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub words: u64,
    pub meta_entries: u64,
    pub time_spans: u64,
    pub duplicates: u64,
    pub empty_words: u64,
    pub orphan_closes: u64,
    pub unclosed_opens: u64,
}

impl FileStats {
    pub fn absorb(&mut self, other: &FileStats) {
        self.words += other.words;
        self.meta_entries += other.meta_entries;
        self.time_spans += other.time_spans;
        self.duplicates += other.duplicates;
        self.empty_words += other.empty_words;
        self.orphan_closes += other.orphan_closes;
        self.unclosed_opens += other.unclosed_opens;
    }
}

/// The open half of a time span, waiting for its close.
struct PendingOpen {
    time_id: i64,
    start_time: TimeCode,
}

/// One open element on the walk stack.
struct Frame {
    tag: String,
    text: String,
    has_children: bool,
    /// Whether the element's ancestor path begins with a `meta` segment
    /// (the document tag contributes an empty segment).
    meta_scope: bool,
    attr_id: Option<String>,
    attr_value: Option<String>,
}

/// Per-file traversal context. Create one per input file and discard it
/// when the walk finishes.
pub struct Traversal<'a> {
    writer: Writer<'a>,
    file: String,
    document_id: i64,
    sentence_id: i64,
    word_id: i64,
    pending: Option<PendingOpen>,
    /// Position of the first word since the last completed span; consumed
    /// as the start position of the next span.
    start_pos: Option<(i64, i64)>,
    frames: Vec<Frame>,
    stats: FileStats,
}

/// Walk one document and write its rows through `storage`.
pub async fn import_document<R: BufRead>(
    storage: &dyn Storage,
    lang: &str,
    file: &str,
    reader: R,
) -> Result<FileStats> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut traversal = Traversal {
        writer: Writer::new(storage, lang),
        file: file.to_string(),
        document_id: -1,
        sentence_id: -1,
        word_id: -1,
        pending: None,
        start_pos: None,
        frames: Vec::new(),
        stats: FileStats::default(),
    };
    traversal.run(&mut xml).await?;
    Ok(traversal.stats)
}

impl<'a> Traversal<'a> {
    async fn run<R: BufRead>(&mut self, xml: &mut Reader<R>) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            match xml.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    self.open_element(&e)?;
                }
                Event::Empty(e) => {
                    self.open_element(&e)?;
                    self.close_element().await?;
                }
                Event::Text(e) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.text.push_str(e.unescape()?.as_ref());
                    }
                }
                Event::CData(e) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::End(_) => {
                    self.close_element().await?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if self.pending.take().is_some() {
            // Accepted asymmetry in the source data: an open half with no
            // matching close is never persisted.
            warn!(file = %self.file, "time span opened but never closed, dropping");
            self.stats.unclosed_opens += 1;
        }
        Ok(())
    }

    /// Handle the opening of an element: update position state and keep the
    /// attributes the closing handler needs.
    fn open_element(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        debug!(depth = self.frames.len(), tag = %tag, "visiting node");

        if let Some(parent) = self.frames.last_mut() {
            parent.has_children = true;
        }
        let meta_scope = self
            .frames
            .iter()
            .find(|f| f.tag != "document")
            .map(|f| f.tag == "meta")
            .unwrap_or(false);

        let mut attr_id = None;
        let mut attr_value = None;
        match tag.as_str() {
            "document" => {
                let id = self.require_attr(e, &tag, "id")?;
                self.document_id = self.parse_int(&tag, &id)?;
            }
            "s" => {
                let id = self.require_attr(e, &tag, "id")?;
                self.sentence_id = self.parse_int(&tag, &id)?;
            }
            "w" => {
                attr_id = Some(self.require_attr(e, &tag, "id")?);
            }
            "time" => {
                attr_id = Some(self.require_attr(e, &tag, "id")?);
                attr_value = Some(self.require_attr(e, &tag, "value")?);
            }
            _ => {}
        }

        self.frames.push(Frame {
            tag,
            text: String::new(),
            has_children: false,
            meta_scope,
            attr_id,
            attr_value,
        });
        Ok(())
    }

    /// Handle the closing of an element: word text and meta values are only
    /// complete here, and span inserts must run after the words they anchor.
    async fn close_element(&mut self) -> Result<()> {
        let frame = match self.frames.pop() {
            Some(f) => f,
            None => return Ok(()),
        };

        match frame.tag.as_str() {
            "w" => {
                let id = frame.attr_id.unwrap_or_default();
                let (sentence_id, word_id) = self.parse_word_id(&id)?;
                self.sentence_id = sentence_id;
                self.word_id = word_id;

                if frame.text.is_empty() {
                    // Recoverable: the row is still written so later time
                    // spans keep valid positions.
                    warn!(
                        file = %self.file,
                        document = self.document_id,
                        word = %id,
                        "w element has no text"
                    );
                    self.stats.empty_words += 1;
                }

                let row = WordRow {
                    document_id: self.document_id,
                    sentence_id,
                    word_id,
                    text: frame.text,
                };
                match self.writer.insert_word(&row).await? {
                    0 => self.stats.duplicates += 1,
                    n => self.stats.words += n,
                }

                if self.start_pos.is_none() {
                    self.start_pos = Some((sentence_id, word_id));
                }
            }
            "time" => {
                let id = frame.attr_id.unwrap_or_default();
                let value = frame.attr_value.unwrap_or_default();
                self.handle_time(&id, &value).await?;
            }
            "document" | "s" | "meta" => {}
            _ if frame.meta_scope && !frame.has_children && !frame.text.is_empty() => {
                let entry = MetaEntry {
                    document_id: self.document_id,
                    key: frame.tag,
                    value: frame.text,
                };
                match self.writer.insert_meta(&entry).await? {
                    0 => self.stats.duplicates += 1,
                    n => self.stats.meta_entries += n,
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// An `id` suffixed `S` opens a span; any other suffix sharing the same
    /// numeric id closes it and triggers the insert.
    async fn handle_time(&mut self, id: &str, value: &str) -> Result<()> {
        let mut chars = id.chars();
        let suffix = chars
            .next_back()
            .ok_or_else(|| self.malformed("time", id, "empty id"))?;
        let body: String = chars.collect();
        let digits = body.trim_start_matches(|c: char| !c.is_ascii_digit());
        let time_id: i64 = digits
            .parse()
            .map_err(|_| self.malformed("time", id, "no numeric time id"))?;

        let timecode =
            TimeCode::parse(value).map_err(|e| self.malformed("time", id, &e.to_string()))?;

        if suffix == 'S' {
            self.pending = Some(PendingOpen {
                time_id,
                start_time: timecode,
            });
            return Ok(());
        }

        let open = match self.pending.take() {
            Some(open) => open,
            None => {
                warn!(file = %self.file, time = %id, "time close without matching open, skipping");
                self.stats.orphan_closes += 1;
                self.start_pos = None;
                return Ok(());
            }
        };

        let (start_sentence_id, start_word_id) = self
            .start_pos
            .take()
            .unwrap_or((self.sentence_id, self.word_id));
        let span = TimeSpan {
            document_id: self.document_id,
            time_id: open.time_id,
            start_sentence_id,
            start_word_id,
            start_time: open.start_time,
            end_sentence_id: self.sentence_id,
            end_word_id: self.word_id,
            end_time: timecode,
        };
        match self.writer.insert_time_span(&span).await? {
            0 => self.stats.duplicates += 1,
            n => self.stats.time_spans += n,
        }
        Ok(())
    }

    fn require_attr(&self, e: &BytesStart<'_>, tag: &str, name: &str) -> Result<String> {
        let attr = e
            .try_get_attribute(name)
            .map_err(|err| self.malformed(tag, "", &err.to_string()))?
            .ok_or_else(|| self.malformed(tag, "", &format!("missing {} attribute", name)))?;
        let value = attr
            .unescape_value()
            .map_err(|err| self.malformed(tag, "", &err.to_string()))?;
        Ok(value.into_owned())
    }

    fn parse_int(&self, tag: &str, value: &str) -> Result<i64> {
        Ok(value
            .parse()
            .map_err(|_| self.malformed(tag, value, "id is not an integer"))?)
    }

    /// `w` ids are composite: `"<sentence_id>.<word_id>"`.
    fn parse_word_id(&self, id: &str) -> Result<(i64, i64)> {
        let (s, w) = id
            .split_once('.')
            .ok_or_else(|| self.malformed("w", id, "expected \"<sentence_id>.<word_id>\""))?;
        let sentence_id = s
            .parse()
            .map_err(|_| self.malformed("w", id, "sentence part is not an integer"))?;
        let word_id = w
            .parse()
            .map_err(|_| self.malformed("w", id, "word part is not an integer"))?;
        Ok((sentence_id, word_id))
    }

    fn malformed(&self, tag: &str, id: &str, reason: &str) -> MalformedNodeError {
        let node = if id.is_empty() {
            tag.to_string()
        } else {
            format!("{} id={:?}", tag, id)
        };
        MalformedNodeError {
            file: self.file.clone(),
            node,
            reason: reason.to_string(),
        }
    }
}
