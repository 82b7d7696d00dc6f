use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;

use crate::diff::split_index_sections;
use crate::error::{Result, ReviewError};
use crate::models::{BackendKind, CommitPage, CommitRecord, DiffEntry, ToolStatus};
use crate::pagination::paginate;
use crate::vcs::{require_repo, ProbeCache, ToolRunner, VcsAdapter};

const SVN_HINT: &str = "Install the Subversion command-line client (e.g. `apt install subversion`, \
or TortoiseSVN with the command line client tools on Windows) and make sure `svn` is on PATH, \
or set SVN_BIN.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Author,
    Date,
    Msg,
}

fn xml_error(detail: impl Into<String>) -> ReviewError {
    ReviewError::command_failed("svn log --xml", detail)
}

fn revision_attr(e: &BytesStart) -> Result<String> {
    let attr = e
        .try_get_attribute("revision")
        .map_err(|err| xml_error(format!("bad logentry attributes: {}", err)))?
        .ok_or_else(|| xml_error("logentry without revision attribute"))?;
    let value = attr
        .unescape_value()
        .map_err(|err| xml_error(format!("bad revision attribute: {}", err)))?;
    Ok(value.into_owned())
}

/// Normalizes RFC 3339 dates to second precision; anything else is kept.
fn normalize_date(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        Err(_) => raw.to_string(),
    }
}

/// Parses `svn log --xml` output into newest-first records.
///
/// The whole document must be well formed and rooted at `<log>`; partial
/// data is rejected since it cannot be paginated reliably.
pub fn parse_log_xml(xml: &str) -> Result<Vec<CommitRecord>> {
    // Message text keeps its whitespace; indentation between elements is
    // ignored since no field is open there.
    let mut reader = Reader::from_str(xml);

    let mut commits = Vec::new();
    let mut buf = Vec::new();
    let mut saw_root = false;
    let mut closed_root = false;
    let mut current: Option<CommitRecord> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"log" => saw_root = true,
                b"logentry" if saw_root => {
                    current = Some(CommitRecord {
                        id: revision_attr(e)?,
                        author: String::new(),
                        timestamp: String::new(),
                        message: String::new(),
                    });
                }
                b"author" => field = Some(Field::Author),
                b"date" => field = Some(Field::Date),
                b"msg" => field = Some(Field::Msg),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"log" => {
                    saw_root = true;
                    closed_root = true;
                }
                b"logentry" if saw_root => commits.push(CommitRecord {
                    id: revision_attr(e)?,
                    author: String::new(),
                    timestamp: String::new(),
                    message: String::new(),
                }),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"logentry" => {
                    if let Some(mut record) = current.take() {
                        record.author = record.author.trim().to_string();
                        record.timestamp = normalize_date(record.timestamp.trim());
                        commits.push(record);
                    }
                }
                b"author" | b"date" | b"msg" => field = None,
                b"log" => closed_root = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| xml_error(format!("bad text content: {}", err)))?;
                append_field(current.as_mut(), field, &text);
            }
            Ok(Event::CData(e)) => {
                append_field(current.as_mut(), field, &String::from_utf8_lossy(&e));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(xml_error(format!(
                    "XML parse error at {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(xml_error("output has no <log> root element"));
    }
    if let Some(open) = current {
        return Err(xml_error(format!(
            "output ends inside logentry r{}",
            open.id
        )));
    }
    if !closed_root {
        return Err(xml_error("output ends before </log>"));
    }
    Ok(commits)
}

fn append_field(record: Option<&mut CommitRecord>, field: Option<Field>, text: &str) {
    let (Some(record), Some(field)) = (record, field) else {
        return;
    };
    let target = match field {
        Field::Author => &mut record.author,
        Field::Date => &mut record.timestamp,
        Field::Msg => &mut record.message,
    };
    target.push_str(text);
}

/// Slices a fully fetched history client-side.
pub fn page_from_records(
    records: Vec<CommitRecord>,
    page: u32,
    page_size: u32,
) -> Result<CommitPage> {
    let total = records.len();
    let window = paginate(total, page, page_size)?;
    if window.is_empty() {
        return Ok(CommitPage::empty(total, page, page_size));
    }

    let commits = records
        .into_iter()
        .skip(window.skip)
        .take(window.count)
        .collect();
    Ok(CommitPage {
        commits,
        total,
        page,
        page_size,
        skipped: 0,
    })
}

fn parse_revision(revision: &str) -> Result<u64> {
    let trimmed = revision.trim();
    let digits = trimmed
        .strip_prefix('r')
        .or_else(|| trimmed.strip_prefix('R'))
        .unwrap_or(trimmed);
    match digits.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ReviewError::InvalidArgument(format!(
            "invalid svn revision '{}'",
            revision
        ))),
    }
}

/// History access through the `svn` command-line client.
pub struct SvnAdapter {
    runner: ToolRunner,
    probe: ProbeCache,
}

impl SvnAdapter {
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            probe: ProbeCache::default(),
        }
    }

    async fn preflight(&self) -> Result<()> {
        match self.probe().await {
            ToolStatus::Unavailable { reason } => Err(ReviewError::ToolUnavailable {
                tool: self.runner.program().display().to_string(),
                hint: reason,
            }),
            ToolStatus::Unknown { detail } => {
                tracing::debug!("svn probe inconclusive, continuing: {}", detail);
                Ok(())
            }
            ToolStatus::Available { .. } => Ok(()),
        }
    }
}

#[async_trait]
impl VcsAdapter for SvnAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Svn
    }

    async fn probe(&self) -> ToolStatus {
        self.probe
            .get_or_probe(|| self.runner.probe(&["--version", "--quiet"], SVN_HINT))
            .await
    }

    async fn invalidate_probe(&self) {
        self.probe.invalidate().await;
    }

    async fn list_commits(&self, repo: &Path, page: u32, page_size: u32) -> Result<CommitPage> {
        require_repo(repo)?;
        paginate(0, page, page_size)?;
        self.preflight().await?;

        let xml = self
            .runner
            .run(Some(repo), &["log", "--xml", "--non-interactive", "."], SVN_HINT)
            .await?;
        let records = parse_log_xml(&xml)?;
        let page = page_from_records(records, page, page_size)?;

        tracing::info!(
            "Listed {} svn revisions (page {}, size {}, total {}) from {:?}",
            page.commits.len(),
            page.page,
            page.page_size,
            page.total,
            repo
        );
        Ok(page)
    }

    async fn get_diff(&self, repo: &Path, revision: &str) -> Result<Vec<DiffEntry>> {
        require_repo(repo)?;
        let revision = parse_revision(revision)?.to_string();
        self.preflight().await?;

        let out = self
            .runner
            .run(
                Some(repo),
                &["diff", "-c", revision.as_str(), "--non-interactive", "."],
                SVN_HINT,
            )
            .await?;
        Ok(split_index_sections(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn log_xml(entries: u32) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<log>\n");
        for rev in (1..=entries).rev() {
            xml.push_str(&format!(
                "<logentry revision=\"{rev}\">\n<author>dev{rev}</author>\n\
                 <date>2024-03-0{d}T10:15:30.123456Z</date>\n<msg>change &amp; fix {rev}</msg>\n</logentry>\n",
                rev = rev,
                d = (rev % 9) + 1
            ));
        }
        xml.push_str("</log>\n");
        xml
    }

    #[test]
    fn test_parse_log_xml_newest_first() {
        let records = parse_log_xml(&log_xml(3)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "3");
        assert_eq!(records[0].author, "dev3");
        assert_eq!(records[0].message, "change & fix 3");
        assert_eq!(records[0].timestamp, "2024-03-04T10:15:30Z");
        assert_eq!(records[2].id, "1");
    }

    #[test]
    fn test_missing_children_default_to_empty() {
        let xml = "<log><logentry revision=\"5\"><msg/></logentry><logentry revision=\"4\"/></log>";
        let records = parse_log_xml(xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].author, "");
        assert_eq!(records[0].timestamp, "");
        assert_eq!(records[0].message, "");
        assert_eq!(records[1].id, "4");
    }

    #[test]
    fn test_empty_log() {
        assert!(parse_log_xml("<?xml version=\"1.0\"?><log/>").unwrap().is_empty());
        assert!(parse_log_xml("<log>\n</log>").unwrap().is_empty());
    }

    #[test]
    fn test_missing_root_fails_whole_call() {
        let err = parse_log_xml("svn: E155007: '/tmp' is not a working copy").unwrap_err();
        assert!(matches!(err, ReviewError::VcsCommandFailed { .. }));

        let err = parse_log_xml("<log><logentry revision=\"1\"><msg>x</logentry>").unwrap_err();
        assert!(matches!(err, ReviewError::VcsCommandFailed { .. }));
    }

    #[test]
    fn test_truncated_log_fails_whole_call() {
        let open_entry = "<log><logentry revision=\"3\"><author>a</author></logentry>\
                          <logentry revision=\"2\"><author>b</author>";
        let err = parse_log_xml(open_entry).unwrap_err();
        assert!(matches!(err, ReviewError::VcsCommandFailed { .. }));

        let open_root = "<log><logentry revision=\"3\"><author>a</author></logentry>";
        let err = parse_log_xml(open_root).unwrap_err();
        assert!(matches!(err, ReviewError::VcsCommandFailed { .. }));
    }

    #[test]
    fn test_message_whitespace_preserved() {
        let xml = "<log>\n  <logentry revision=\"9\">\n    <author>\n dev \n</author>\n    \
                   <msg>  indented first line\nsecond\n</msg>\n  </logentry>\n</log>\n";
        let records = parse_log_xml(xml).unwrap();
        assert_eq!(records[0].message, "  indented first line\nsecond\n");
        assert_eq!(records[0].author, "dev");
    }

    #[test]
    fn test_seven_entries_fit_one_page() {
        let records = parse_log_xml(&log_xml(7)).unwrap();
        let page = page_from_records(records, 1, 50).unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.commits.len(), 7);
        assert_eq!(page.commits[0].id, "7");
    }

    #[test]
    fn test_client_side_slicing() {
        let records = parse_log_xml(&log_xml(12)).unwrap();
        let page = page_from_records(records.clone(), 2, 5).unwrap();
        let ids: Vec<_> = page.commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "6", "5", "4", "3"]);

        let past_end = page_from_records(records, 4, 5).unwrap();
        assert!(past_end.commits.is_empty());
        assert_eq!(past_end.total, 12);
    }

    #[test]
    fn test_revision_parsing() {
        assert_eq!(parse_revision("42").unwrap(), 42);
        assert_eq!(parse_revision("r7").unwrap(), 7);
        assert!(parse_revision("0").is_err());
        assert!(parse_revision("-r5").is_err());
        assert!(parse_revision("HEAD").is_err());
    }

    #[tokio::test]
    async fn test_missing_svn_is_tool_unavailable() {
        let adapter = SvnAdapter::new(ToolRunner::new(
            "definitely-not-svn-binary",
            Duration::from_secs(5),
        ));
        let dir = tempfile::tempdir().unwrap();
        let err = adapter.list_commits(dir.path(), 1, 10).await.unwrap_err();
        match err {
            ReviewError::ToolUnavailable { hint, .. } => assert!(hint.contains("Subversion")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
