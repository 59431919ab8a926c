//! Environment checks for the `atlas doctor` command. Values are never
//! reported, only their state and a mask.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

pub const MIN_KEY_LENGTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VarState {
    Missing,
    Blank,
    TooShort,
    Invalid,
    Ok,
}

impl VarState {
    pub fn is_problem(&self) -> bool {
        !matches!(self, VarState::Ok)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VarCheck {
    pub name: &'static str,
    pub required: bool,
    /// Secret keys must be at least `MIN_KEY_LENGTH` long
    pub secret: bool,
}

pub const CHECKS: &[VarCheck] = &[
    VarCheck { name: "DATABASE_URL", required: true, secret: false },
    VarCheck { name: "EMAIL_API_KEY", required: false, secret: true },
    VarCheck { name: "EMAIL_FROM", required: false, secret: false },
    VarCheck { name: "ATLAS_AIRTABLE_REQUESTS_CSV", required: false, secret: false },
    VarCheck { name: "ATLAS_CLINICHQ_APPOINTMENTS_XLSX", required: false, secret: false },
    VarCheck { name: "APP_ENV", required: false, secret: false },
];

#[derive(Debug, Clone, Serialize)]
pub struct VarReport {
    pub name: &'static str,
    pub required: bool,
    pub state: VarState,
    pub masked: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub vars: Vec<VarReport>,
    /// Keys defined more than once in `.env`, with their line numbers
    pub duplicates: BTreeMap<String, Vec<usize>>,
}

impl DoctorReport {
    /// Required variables in a bad state, or any duplicate definitions
    pub fn has_errors(&self) -> bool {
        self.vars.iter().any(|v| v.required && v.state.is_problem()) || !self.duplicates.is_empty()
    }
}

/// First four characters plus the length
pub fn mask_value(value: &str) -> String {
    let len = value.chars().count();
    if len == 0 {
        "(empty)".to_string()
    } else if len <= 4 {
        "****".to_string()
    } else {
        let prefix: String = value.chars().take(4).collect();
        format!("{}...({} chars)", prefix, len)
    }
}

pub fn classify(check: &VarCheck, value: Option<&str>) -> (VarState, Option<String>) {
    let Some(value) = value else {
        return (VarState::Missing, None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return (VarState::Blank, None);
    }
    if check.secret && trimmed.chars().count() < MIN_KEY_LENGTH {
        return (
            VarState::TooShort,
            Some(format!("expected at least {} characters", MIN_KEY_LENGTH)),
        );
    }
    if check.name == "DATABASE_URL" {
        if let Err(problem) = check_postgres_url(trimmed) {
            return (VarState::Invalid, Some(problem));
        }
    }
    (VarState::Ok, None)
}

pub fn check_postgres_url(raw: &str) -> Result<(), String> {
    let url = url::Url::parse(raw).map_err(|e| format!("not a URL: {}", e))?;
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        return Err(format!("scheme '{}' is not postgres", url.scheme()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(())
}

/// Line numbers of keys assigned more than once in a dotenv file
pub fn duplicate_keys(path: &Path) -> BTreeMap<String, Vec<usize>> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    let mut seen: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, _)) = line.split_once('=') {
            seen.entry(key.trim().to_string()).or_default().push(i + 1);
        }
    }
    seen.retain(|_, lines| lines.len() > 1);
    seen
}

/// Inspect `lookup` (normally the process environment) and `.env`
pub fn run_with<F>(lookup: F, dotenv_path: &Path) -> DoctorReport
where
    F: Fn(&str) -> Option<String>,
{
    let vars = CHECKS
        .iter()
        .map(|check| {
            let value = lookup(check.name);
            let (state, detail) = classify(check, value.as_deref());
            VarReport {
                name: check.name,
                required: check.required,
                state,
                masked: value.as_deref().filter(|_| check.secret).map(mask_value),
                detail,
            }
        })
        .collect();
    DoctorReport {
        vars,
        duplicates: duplicate_keys(dotenv_path),
    }
}

pub fn run() -> DoctorReport {
    run_with(|name| std::env::var(name).ok(), Path::new(".env"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn masks_never_reveal_more_than_four_chars() {
        assert_eq!(mask_value(""), "(empty)");
        assert_eq!(mask_value("abcd"), "****");
        assert_eq!(mask_value("sk_live_0123456789"), "sk_l...(18 chars)");
    }

    #[test]
    fn classifies_states() {
        let key = CHECKS[1];
        assert_eq!(classify(&key, None).0, VarState::Missing);
        assert_eq!(classify(&key, Some("   ")).0, VarState::Blank);
        assert_eq!(classify(&key, Some("short")).0, VarState::TooShort);
        assert_eq!(classify(&key, Some("k".repeat(20).as_str())).0, VarState::Ok);
    }

    #[test]
    fn database_url_must_be_postgres() {
        let db = CHECKS[0];
        assert_eq!(classify(&db, Some("postgres://u:p@localhost/atlas")).0, VarState::Ok);
        assert_eq!(classify(&db, Some("mysql://localhost/atlas")).0, VarState::Invalid);
        assert_eq!(classify(&db, Some("not a url")).0, VarState::Invalid);
    }

    #[test]
    fn report_flags_missing_required_and_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment\nEMAIL_FROM=a@x.org\nexport EMAIL_FROM=b@x.org\nAPP_ENV=development").unwrap();

        let env: HashMap<&str, &str> = HashMap::from([("EMAIL_API_KEY", "0123456789abcdefghijXYZ")]);
        let report = run_with(|k| env.get(k).map(|v| v.to_string()), file.path());

        let db = report.vars.iter().find(|v| v.name == "DATABASE_URL").unwrap();
        assert_eq!(db.state, VarState::Missing);
        let key = report.vars.iter().find(|v| v.name == "EMAIL_API_KEY").unwrap();
        assert_eq!(key.state, VarState::Ok);
        assert_eq!(key.masked.as_deref(), Some("0123...(23 chars)"));
        assert_eq!(report.duplicates.get("EMAIL_FROM"), Some(&vec![2, 3]));
        assert!(report.has_errors());
    }
}
