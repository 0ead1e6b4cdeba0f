//! 증분 테일러
//!
//! 원격 로그 파일에서 지난 커서 이후의 **완전한 라인**만 읽습니다.
//!
//! # 콜드/핫 스타트
//! ```text
//!            ┌─ 커서 없음 / 강제 / 경로 변경 / 지문 불일치 / size < offset ─► COLD
//! stat+head ─┤     offset = size, 라인 반환 없음, 지문 갱신
//!            └─ 그 외 ─► HOT
//!                  [offset, min(size, offset + max_read_bytes)) 읽기
//!                  마지막 개행까지만 소비, 부분 라인은 다음 사이클에 다시 읽음
//! ```
//!
//! 지문은 파일 선두 바이트의 해시이므로 append로는 바뀌지 않고, 파일이
//! 교체(rotation)되면 바뀝니다. 한 사이클의 모든 원격 호출은 하나의 블로킹
//! 작업으로 묶여 작업자 풀에서 실행됩니다.

use std::fmt;

use chrono::Utc;
use metrics::counter;
use regex::Regex;
use tailpost_core::config::TailerConfig;
use tailpost_core::metrics as m;
use tailpost_core::types::{CursorMode, SourceCursor, SourceFingerprint, SourceKey};
use tracing::{debug, info};

use crate::connector::RemoteSession;
use crate::error::RemoteError;
use crate::pool::ConnectionLease;

/// 테일러 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailSettings {
    /// 사이클당 최대 읽기 바이트
    pub max_read_bytes: u64,
    /// 지문 계산 선두 바이트 수
    pub fingerprint_bytes: u64,
}

impl TailSettings {
    /// 설정 섹션에서 생성합니다.
    pub fn from_config(config: &TailerConfig) -> Self {
        Self {
            max_read_bytes: config.max_read_bytes.max(1),
            fingerprint_bytes: config.fingerprint_bytes,
        }
    }
}

impl Default for TailSettings {
    fn default() -> Self {
        Self::from_config(&TailerConfig::default())
    }
}

/// 콜드 스타트 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdStartReason {
    /// 저장된 커서 없음 (첫 접속)
    NoCursor,
    /// 운영자 요청
    Forced,
    /// 와일드카드 경로가 다른 파일로 바뀜
    PathChanged,
    /// 선두 바이트가 바뀜 (로테이션)
    Rotated,
    /// 파일이 저장된 offset보다 작아짐
    Truncated,
}

impl ColdStartReason {
    /// 라벨/로그용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoCursor => "no_cursor",
            Self::Forced => "forced",
            Self::PathChanged => "path_changed",
            Self::Rotated => "rotated",
            Self::Truncated => "truncated",
        }
    }
}

impl fmt::Display for ColdStartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 한 번의 테일 요청
#[derive(Debug, Clone)]
pub struct TailRequest {
    /// 소스 키
    pub key: SourceKey,
    /// 원격 경로 (마지막 컴포넌트에 `*` 허용)
    pub path_pattern: String,
    /// 저장된 커서
    pub cursor: Option<SourceCursor>,
    /// 강제 콜드 스타트
    pub force_cold: bool,
}

/// 테일 결과
#[derive(Debug, Clone)]
pub struct TailOutcome {
    /// 새로 읽은 완전한 라인 (순서 유지)
    pub lines: Vec<String>,
    /// 사이클이 성공하면 저장할 새 커서
    pub cursor: SourceCursor,
    /// 이번 읽기 모드
    pub mode: CursorMode,
    /// 콜드 스타트였다면 그 사유
    pub cold_start: Option<ColdStartReason>,
    /// 디코드 에러(치환된 라인, 건너뛴 초과 길이 구간) 수
    pub decode_errors: u64,
    /// 이번에 읽은 바이트 수
    pub bytes_read: u64,
    /// `max_read_bytes` 제한 때문에 남은 데이터가 있는지
    pub backlog: bool,
}

/// 바이트 버퍼를 완전한 라인으로 나눈 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitLines {
    /// 비어 있지 않은 라인 (`\r\n`의 `\r` 제거)
    pub lines: Vec<String>,
    /// 마지막 개행 다음 위치 (소비한 바이트 수)
    pub consumed: usize,
    /// UTF-8이 아니어서 치환 문자로 대체한 라인 수
    pub decode_errors: u64,
}

/// 버퍼를 완전한 라인으로 나눕니다.
///
/// 마지막 개행 이후의 부분 라인은 소비하지 않습니다. 잘못된 UTF-8 바이트는
/// U+FFFD로 치환하고 해당 라인을 디코드 에러로 셉니다.
pub fn split_complete_lines(buf: &[u8]) -> SplitLines {
    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return SplitLines::default();
    };
    let complete = &buf[..last_newline];

    let mut out = SplitLines {
        consumed: last_newline + 1,
        ..SplitLines::default()
    };
    for raw in complete.split(|&b| b == b'\n') {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        let line = match std::str::from_utf8(raw) {
            Ok(text) => text.to_owned(),
            Err(_) => {
                out.decode_errors += 1;
                String::from_utf8_lossy(raw).into_owned()
            }
        };
        out.lines.push(line);
    }
    out
}

/// `*` 와일드카드 하나 이상을 포함할 수 있는 파일 이름 패턴
fn glob_regex(pattern: &str) -> Result<Regex, RemoteError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| RemoteError::Protocol(format!("invalid path pattern '{pattern}': {e}")))
}

/// 경로 패턴을 실제 파일 경로로 해석합니다.
///
/// 마지막 컴포넌트에 `*`가 있으면 상위 디렉토리에서 일치하는 파일 중
/// 가장 최근에 수정된 파일을 고릅니다 (같으면 이름이 큰 쪽).
pub fn resolve_path<S: RemoteSession + ?Sized>(
    session: &mut S,
    pattern: &str,
) -> Result<String, RemoteError> {
    let (dir, name) = match pattern.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", pattern),
    };
    if !name.contains('*') {
        return Ok(pattern.to_owned());
    }

    let matcher = glob_regex(name)?;
    session
        .list_dir(dir)?
        .into_iter()
        .filter(|entry| entry.is_file && matcher.is_match(&entry.name))
        .max_by(|a, b| {
            a.stat
                .mtime
                .cmp(&b.stat.mtime)
                .then_with(|| a.name.cmp(&b.name))
        })
        .map(|entry| entry.path)
        .ok_or_else(|| RemoteError::NotFound(pattern.to_owned()))
}

/// 세션에서 직접 한 번의 테일을 수행합니다 (블로킹).
pub fn tail_session<S: RemoteSession + ?Sized>(
    session: &mut S,
    request: &TailRequest,
    settings: TailSettings,
) -> Result<TailOutcome, RemoteError> {
    let path = resolve_path(session, &request.path_pattern)?;
    let size = session.stat(&path)?.size;

    let stored_head = request
        .cursor
        .as_ref()
        .map(|c| c.fingerprint.head_len)
        .unwrap_or(0);
    let head_len = size.min(settings.fingerprint_bytes.max(stored_head));
    let head = if head_len > 0 {
        session.read_at(&path, 0, head_len)?
    } else {
        bytes::Bytes::new()
    };
    let fingerprint_window = (size.min(settings.fingerprint_bytes) as usize).min(head.len());
    let fingerprint = SourceFingerprint::of_head(&head[..fingerprint_window]);

    let cold_reason = match &request.cursor {
        _ if request.force_cold => Some(ColdStartReason::Forced),
        None => Some(ColdStartReason::NoCursor),
        Some(cursor) if cursor.path != path => Some(ColdStartReason::PathChanged),
        Some(cursor) if (head.len() as u64) < cursor.fingerprint.head_len => {
            Some(ColdStartReason::Truncated)
        }
        Some(cursor)
            if SourceFingerprint::of_head(&head[..cursor.fingerprint.head_len as usize])
                != cursor.fingerprint =>
        {
            Some(ColdStartReason::Rotated)
        }
        Some(cursor) if size < cursor.offset => Some(ColdStartReason::Truncated),
        Some(_) => None,
    };

    let new_cursor = |offset: u64, mode: CursorMode| SourceCursor {
        key: request.key.clone(),
        offset,
        fingerprint,
        mode,
        path: path.clone(),
        updated_at: Utc::now(),
    };

    let (Some(cursor), None) = (&request.cursor, cold_reason) else {
        return Ok(TailOutcome {
            lines: Vec::new(),
            cursor: new_cursor(size, CursorMode::Cold),
            mode: CursorMode::Cold,
            cold_start: cold_reason,
            decode_errors: 0,
            bytes_read: 0,
            backlog: false,
        });
    };

    let offset = cursor.offset;
    if size == offset {
        return Ok(TailOutcome {
            lines: Vec::new(),
            cursor: new_cursor(offset, CursorMode::Hot),
            mode: CursorMode::Hot,
            cold_start: None,
            decode_errors: 0,
            bytes_read: 0,
            backlog: false,
        });
    }

    let window = (size - offset).min(settings.max_read_bytes);
    let buf = session.read_at(&path, offset, window)?;
    let mut split = split_complete_lines(&buf);

    if split.consumed == 0 && buf.len() as u64 >= settings.max_read_bytes {
        // 개행 없는 초과 길이 구간: 건너뛰어 커서가 멈추지 않게 함
        split.consumed = buf.len();
        split.decode_errors += 1;
    }

    let new_offset = offset + split.consumed as u64;
    Ok(TailOutcome {
        lines: split.lines,
        cursor: new_cursor(new_offset, CursorMode::Hot),
        mode: CursorMode::Hot,
        cold_start: None,
        decode_errors: split.decode_errors,
        bytes_read: buf.len() as u64,
        backlog: offset + window < size,
    })
}

/// 임대한 세션으로 증분 읽기를 수행하는 테일러
#[derive(Debug, Clone, Copy, Default)]
pub struct Tailer {
    settings: TailSettings,
}

impl Tailer {
    /// 새 테일러를 생성합니다.
    pub fn new(settings: TailSettings) -> Self {
        Self { settings }
    }

    /// 적용 중인 설정
    pub fn settings(&self) -> TailSettings {
        self.settings
    }

    /// 커서 이후의 새 라인을 읽습니다.
    ///
    /// 반환된 커서는 저장되지 않습니다. 호출자가 사이클 성공 후 저장합니다.
    /// 같은 커서와 같은 파일 내용에 대해 반복 호출하면 같은 라인을 반환합니다.
    pub async fn read_new<S: RemoteSession>(
        &self,
        lease: &mut ConnectionLease<S>,
        request: TailRequest,
    ) -> Result<TailOutcome, RemoteError> {
        let settings = self.settings;
        let key = request.key.clone();
        let outcome = lease
            .run("tail", move |session| tail_session(session, &request, settings))
            .await?;

        let source = key.to_string();
        counter!(m::TAILER_BYTES_READ_TOTAL, m::LABEL_SOURCE => source.clone())
            .increment(outcome.bytes_read);
        counter!(m::TAILER_LINES_TOTAL, m::LABEL_SOURCE => source.clone())
            .increment(outcome.lines.len() as u64);
        if outcome.decode_errors > 0 {
            counter!(m::TAILER_DECODE_ERRORS_TOTAL, m::LABEL_SOURCE => source.clone())
                .increment(outcome.decode_errors);
        }

        match outcome.cold_start {
            Some(reason) => {
                counter!(m::TAILER_COLD_STARTS_TOTAL, m::LABEL_SOURCE => source, "reason" => reason.as_str())
                    .increment(1);
                info!(
                    source = %key,
                    path = %outcome.cursor.path,
                    offset = outcome.cursor.offset,
                    reason = %reason,
                    "cold start, baseline established"
                );
            }
            None => debug!(
                source = %key,
                lines = outcome.lines.len(),
                offset = outcome.cursor.offset,
                backlog = outcome.backlog,
                "hot read"
            ),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::RemoteConnector;
    use crate::connector::mock::{MockConnector, MockSession};
    use crate::strategy::TransportStrategy;
    use proptest::prelude::*;
    use std::time::Duration;
    use tailpost_core::types::{SourceAuth, SourceCredentials};

    const PATH: &str = "/logs/server.log";
    const LINE_A: &str = "[2024.01.15-12.00.00:000][  1]LogNet: Join request: Name=\"Alice\" EOSID=00aa\n";
    const LINE_B: &str = "[2024.01.15-12.00.05:000][  2]LogNet: Player disconnected: EOSID=00aa\n";

    fn session(connector: &MockConnector) -> MockSession {
        let creds = SourceCredentials {
            host: "h".to_owned(),
            port: 22,
            username: "u".to_owned(),
            auth: SourceAuth::Password("p".to_owned()),
        };
        connector
            .connect(
                &creds,
                &TransportStrategy::library_default("A"),
                Duration::from_secs(1),
            )
            .unwrap()
    }

    fn request(cursor: Option<SourceCursor>) -> TailRequest {
        TailRequest {
            key: SourceKey::new("guild-1", "eu-1"),
            path_pattern: PATH.to_owned(),
            cursor,
            force_cold: false,
        }
    }

    fn settings() -> TailSettings {
        TailSettings {
            max_read_bytes: 4096,
            fingerprint_bytes: 32,
        }
    }

    #[test]
    fn empty_source_cold_starts_at_zero() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, b"", 1);
        let mut s = session(&connector);

        let out = tail_session(&mut s, &request(None), settings()).unwrap();
        assert_eq!(out.cursor.offset, 0);
        assert_eq!(out.mode, CursorMode::Cold);
        assert_eq!(out.cold_start, Some(ColdStartReason::NoCursor));
        assert!(out.lines.is_empty());
    }

    #[test]
    fn cold_start_never_returns_history() {
        let connector = MockConnector::new();
        let history = LINE_A.repeat(500);
        connector.fs.write(PATH, history.as_bytes(), 1);
        let mut s = session(&connector);

        let out = tail_session(&mut s, &request(None), settings()).unwrap();
        assert!(out.lines.is_empty());
        assert_eq!(out.cursor.offset, history.len() as u64);
        assert_eq!(out.bytes_read, 0);
    }

    #[test]
    fn hot_read_returns_appended_lines() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, LINE_A.as_bytes(), 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();

        connector.fs.append(PATH, LINE_A.as_bytes());
        connector.fs.append(PATH, LINE_B.as_bytes());
        let hot = tail_session(&mut s, &request(Some(cold.cursor)), settings()).unwrap();

        assert_eq!(hot.mode, CursorMode::Hot);
        assert_eq!(hot.lines.len(), 2);
        assert_eq!(hot.lines[1], LINE_B.trim_end());
        assert_eq!(
            hot.cursor.offset,
            (LINE_A.len() * 2 + LINE_B.len()) as u64
        );
    }

    #[test]
    fn partial_line_is_left_for_next_cycle() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, LINE_A.as_bytes(), 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();

        let (head, tail) = LINE_B.split_at(20);
        connector.fs.append(PATH, head.as_bytes());
        let first = tail_session(&mut s, &request(Some(cold.cursor.clone())), settings()).unwrap();
        assert!(first.lines.is_empty());
        assert_eq!(first.cursor.offset, cold.cursor.offset);

        connector.fs.append(PATH, tail.as_bytes());
        let second = tail_session(&mut s, &request(Some(first.cursor)), settings()).unwrap();
        assert_eq!(second.lines, vec![LINE_B.trim_end().to_owned()]);
    }

    #[test]
    fn rereading_same_cursor_is_idempotent() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, LINE_A.as_bytes(), 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();
        connector.fs.append(PATH, LINE_B.as_bytes());

        let a = tail_session(&mut s, &request(Some(cold.cursor.clone())), settings()).unwrap();
        let b = tail_session(&mut s, &request(Some(cold.cursor)), settings()).unwrap();
        assert_eq!(a.lines, b.lines);
        assert_eq!(a.cursor.offset, b.cursor.offset);
    }

    #[test]
    fn truncation_forces_cold_start() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, LINE_A.repeat(4).as_bytes(), 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();

        // same head, shorter file
        connector.fs.write(PATH, LINE_A.as_bytes(), 2);
        let out = tail_session(&mut s, &request(Some(cold.cursor)), settings()).unwrap();
        assert_eq!(out.cold_start, Some(ColdStartReason::Truncated));
        assert_eq!(out.cursor.offset, LINE_A.len() as u64);
        assert!(out.lines.is_empty());
    }

    #[test]
    fn rotation_detected_by_head_fingerprint() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, LINE_A.as_bytes(), 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();

        // new file, longer than before, different head
        let rotated = format!("{LINE_B}{LINE_B}");
        connector.fs.write(PATH, rotated.as_bytes(), 2);
        let out = tail_session(&mut s, &request(Some(cold.cursor)), settings()).unwrap();
        assert_eq!(out.cold_start, Some(ColdStartReason::Rotated));
        assert!(out.lines.is_empty());
    }

    #[test]
    fn short_fingerprint_widens_as_file_grows() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, b"[2024", 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();
        assert_eq!(cold.cursor.fingerprint.head_len, 5);

        connector.fs.append(PATH, LINE_A.as_bytes());
        let hot = tail_session(&mut s, &request(Some(cold.cursor)), settings()).unwrap();
        assert_eq!(hot.mode, CursorMode::Hot);
        assert_eq!(hot.cursor.fingerprint.head_len, 32);
    }

    #[test]
    fn forced_cold_start_skips_pending_data() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, LINE_A.as_bytes(), 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();
        connector.fs.append(PATH, LINE_B.as_bytes());

        let mut req = request(Some(cold.cursor));
        req.force_cold = true;
        let out = tail_session(&mut s, &req, settings()).unwrap();
        assert_eq!(out.cold_start, Some(ColdStartReason::Forced));
        assert!(out.lines.is_empty());
    }

    #[test]
    fn read_is_bounded_and_reports_backlog() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, b"", 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();
        connector.fs.append(PATH, LINE_A.repeat(10).as_bytes());

        let small = TailSettings {
            max_read_bytes: (LINE_A.len() * 3 + 5) as u64,
            fingerprint_bytes: 32,
        };
        let out = tail_session(&mut s, &request(Some(cold.cursor)), small).unwrap();
        assert_eq!(out.lines.len(), 3);
        assert!(out.backlog);
        assert_eq!(out.cursor.offset, (LINE_A.len() * 3) as u64);
    }

    #[test]
    fn oversized_line_window_is_skipped() {
        let connector = MockConnector::new();
        connector.fs.write(PATH, b"", 1);
        let mut s = session(&connector);
        let cold = tail_session(&mut s, &request(None), settings()).unwrap();
        connector.fs.append(PATH, &[b'x'; 100]);

        let small = TailSettings {
            max_read_bytes: 40,
            fingerprint_bytes: 32,
        };
        let out = tail_session(&mut s, &request(Some(cold.cursor)), small).unwrap();
        assert!(out.lines.is_empty());
        assert_eq!(out.decode_errors, 1);
        assert_eq!(out.cursor.offset, 40);
    }

    #[test]
    fn wildcard_picks_newest_file_and_switch_is_cold() {
        let connector = MockConnector::new();
        connector.fs.write("/logs/server-1.log", LINE_A.as_bytes(), 10);
        connector.fs.write("/logs/server-2.log", LINE_B.as_bytes(), 20);
        connector.fs.write("/logs/notes.txt", b"x\n", 30);
        let mut s = session(&connector);

        let mut req = request(None);
        req.path_pattern = "/logs/server-*.log".to_owned();
        let first = tail_session(&mut s, &req, settings()).unwrap();
        assert_eq!(first.cursor.path, "/logs/server-2.log");

        connector.fs.write("/logs/server-3.log", LINE_A.as_bytes(), 40);
        req.cursor = Some(first.cursor);
        let second = tail_session(&mut s, &req, settings()).unwrap();
        assert_eq!(second.cursor.path, "/logs/server-3.log");
        assert_eq!(second.cold_start, Some(ColdStartReason::PathChanged));
    }

    #[test]
    fn wildcard_without_match_is_not_found() {
        let connector = MockConnector::new();
        let mut s = session(&connector);
        let mut req = request(None);
        req.path_pattern = "/logs/*.log".to_owned();
        let err = tail_session(&mut s, &req, settings()).unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[test]
    fn split_handles_crlf_and_invalid_utf8() {
        let split = split_complete_lines(b"one\r\n\xffbad\n\ntwo\npartial");
        assert_eq!(split.lines.len(), 3);
        assert_eq!(split.lines[0], "one");
        assert!(split.lines[1].starts_with('\u{FFFD}'));
        assert_eq!(split.decode_errors, 1);
        assert_eq!(split.consumed, 15);
    }

    proptest! {
        #[test]
        fn split_never_consumes_past_last_newline(buf in proptest::collection::vec(any::<u8>(), 0..512)) {
            let split = split_complete_lines(&buf);
            prop_assert!(split.consumed <= buf.len());
            prop_assert!(!buf[split.consumed..].contains(&b'\n'));
            if split.consumed > 0 {
                prop_assert_eq!(buf[split.consumed - 1], b'\n');
            }
            prop_assert!(split.lines.iter().all(|l| !l.contains('\n')));
        }

        #[test]
        fn split_preserves_ascii_lines(lines in proptest::collection::vec("[a-zA-Z0-9 :\\[\\]]{1,40}", 0..20)) {
            let joined: String = lines.iter().map(|l| format!("{l}\n")).collect();
            let split = split_complete_lines(joined.as_bytes());
            prop_assert_eq!(split.lines, lines);
            prop_assert_eq!(split.consumed, joined.len());
            prop_assert_eq!(split.decode_errors, 0);
        }
    }
}
