//! Analysis verdict: the solver's typed output plus per-project persistence.

use std::collections::BTreeMap;
use std::fmt;

use crate::host::ProjectData;

use super::baseline::Baseline;
use super::cookie::{Cookie, CookieId};
use super::replay::ReplayResult;
use super::request::CaptureRequest;

/// Final classification of one input cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieStatus {
    Required,
    Optional,
    Alternative,
    Unknown,
}

impl CookieStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieStatus::Required => "REQUIRED",
            CookieStatus::Optional => "OPTIONAL",
            CookieStatus::Alternative => "ALTERNATIVE",
            CookieStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "REQUIRED" => CookieStatus::Required,
            "OPTIONAL" => CookieStatus::Optional,
            "ALTERNATIVE" => CookieStatus::Alternative,
            _ => CookieStatus::Unknown,
        }
    }
}

impl fmt::Display for CookieStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replay performed during the run, kept for UI playback.
#[derive(Debug, Clone)]
pub struct ReplayRecord {
    pub label: String,
    pub request: CaptureRequest,
    pub result: ReplayResult,
}

/// Outcome of one `analyze` call.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub required: Vec<Cookie>,
    pub optional: Vec<Cookie>,
    pub alternatives: BTreeMap<CookieId, Vec<Cookie>>,
    pub statuses: BTreeMap<CookieId, CookieStatus>,
    pub details: BTreeMap<CookieId, String>,
    pub requests_sent: u32,
    pub baseline: Option<Baseline>,
    pub replays: Vec<ReplayRecord>,
    pub unreliable: bool,
}

impl Verdict {
    pub fn is_required(&self, cookie: &Cookie) -> bool {
        self.required.iter().any(|c| c == cookie)
    }

    pub fn status(&self, cookie: &Cookie) -> CookieStatus {
        self.statuses
            .get(&cookie.id())
            .copied()
            .unwrap_or(CookieStatus::Unknown)
    }

    pub fn alternatives_for(&self, cookie: &Cookie) -> &[Cookie] {
        self.alternatives
            .get(&cookie.id())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn detail(&self, cookie: &Cookie) -> Option<&str> {
        self.details.get(&cookie.id()).map(String::as_str)
    }

    /// First replay recorded under the given label, if any.
    pub fn replay(&self, label: &str) -> Option<&ReplayRecord> {
        self.replays.iter().find(|record| record.label == label)
    }

    /// The analysis never produced a baseline, so every cookie is `Unknown`.
    pub fn is_failed(&self) -> bool {
        self.baseline.is_none()
    }
}

const RESULT_COUNT_KEY: &str = "cookieAnalysis.resultCount";

/// One persisted result row, as reconstructed from project storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedResultRow {
    pub cookie_name: String,
    pub status: String,
    pub required: String,
    pub response_code: String,
    pub details: String,
}

/// Persist the verdict's per-cookie rows into the host's project storage.
///
/// Replays are intentionally not persisted; only the derived rows survive a
/// host restart.
pub fn persist_verdict(project: &dyn ProjectData, verdict: &Verdict) {
    let mut cookies: Vec<&Cookie> = verdict
        .required
        .iter()
        .chain(verdict.optional.iter())
        .collect();
    cookies.sort_by_key(|c| c.id());

    project.set_int(RESULT_COUNT_KEY, cookies.len() as i64);
    for (index, cookie) in cookies.iter().enumerate() {
        let prefix = format!("cookieAnalysis.result.{index}.");
        let status = verdict.status(cookie);
        let response_code = row_response_code(verdict, cookie);

        project.set_string(&format!("{prefix}cookieName"), cookie.name());
        project.set_string(&format!("{prefix}status"), status.as_str());
        project.set_string(
            &format!("{prefix}required"),
            if status == CookieStatus::Required {
                "Yes"
            } else {
                "No"
            },
        );
        project.set_string(&format!("{prefix}responseCode"), &response_code);
        project.set_string(
            &format!("{prefix}details"),
            verdict.detail(cookie).unwrap_or(""),
        );
    }
}

/// Load previously persisted rows. Missing fields come back empty rather than
/// erroring, mirroring how the host returns absent keys.
pub fn load_saved_results(project: &dyn ProjectData) -> Vec<SavedResultRow> {
    let count = project.get_int(RESULT_COUNT_KEY).unwrap_or(0).max(0) as usize;
    let mut rows = Vec::with_capacity(count);
    for index in 0..count {
        let prefix = format!("cookieAnalysis.result.{index}.");
        let get = |suffix: &str| {
            project
                .get_string(&format!("{prefix}{suffix}"))
                .unwrap_or_default()
        };
        rows.push(SavedResultRow {
            cookie_name: get("cookieName"),
            status: get("status"),
            required: get("required"),
            response_code: get("responseCode"),
            details: get("details"),
        });
    }
    rows
}

fn row_response_code(verdict: &Verdict, cookie: &Cookie) -> String {
    let without_label = format!("WITHOUT:{}", cookie.name());
    verdict
        .replay(&without_label)
        .and_then(|record| record.result.status())
        .or_else(|| verdict.baseline.as_ref().map(|b| b.status()))
        .map(|status| status.to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryProjectData;

    fn cookie(index: usize, name: &str) -> Cookie {
        Cookie::new(CookieId(index), name, "v")
    }

    fn verdict() -> Verdict {
        let sid = cookie(0, "sid");
        let ga = cookie(1, "_ga");
        let mut statuses = BTreeMap::new();
        statuses.insert(sid.id(), CookieStatus::Required);
        statuses.insert(ga.id(), CookieStatus::Optional);
        let mut details = BTreeMap::new();
        details.insert(sid.id(), "Required - removal causes failure".to_string());
        details.insert(ga.id(), "Optional - removal has no effect".to_string());
        Verdict {
            required: vec![sid],
            optional: vec![ga],
            alternatives: BTreeMap::new(),
            statuses,
            details,
            requests_sent: 5,
            baseline: None,
            replays: Vec::new(),
            unreliable: false,
        }
    }

    #[test]
    fn persisted_rows_round_trip() {
        let project = MemoryProjectData::new();
        persist_verdict(&project, &verdict());

        let rows = load_saved_results(&project);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cookie_name, "sid");
        assert_eq!(rows[0].status, "REQUIRED");
        assert_eq!(rows[0].required, "Yes");
        assert_eq!(rows[1].cookie_name, "_ga");
        assert_eq!(rows[1].required, "No");
    }

    #[test]
    fn loading_with_no_saved_results_is_empty() {
        let project = MemoryProjectData::new();
        assert!(load_saved_results(&project).is_empty());
    }
}
