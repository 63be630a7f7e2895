//! Child environment construction.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// Variables kept when the allow-list is active.
#[cfg(windows)]
pub const ALLOWED_VARIABLES: &[&str] = &[
    "ALLUSERSPROFILE",
    "APPDATA",
    "COMMONPROGRAMFILES",
    "COMMONPROGRAMFILES(X86)",
    "COMMONPROGRAMW6432",
    "COMPUTERNAME",
    "COMSPEC",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "LOGONSERVER",
    "NUMBER_OF_PROCESSORS",
    "OS",
    "PATHEXT",
    "PROCESSOR_ARCHITECTURE",
    "PROCESSOR_IDENTIFIER",
    "PROCESSOR_LEVEL",
    "PROCESSOR_REVISION",
    "PROGRAMDATA",
    "PROGRAMFILES",
    "PROGRAMFILES(X86)",
    "PROGRAMW6432",
    "PSMODULEPATH",
    "PUBLIC",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "TMP",
    "USERDOMAIN",
    "USERNAME",
    "USERPROFILE",
    "WINDIR",
];

#[cfg(not(windows))]
pub const ALLOWED_VARIABLES: &[&str] = &[
    "HOME", "LANG", "LC_ALL", "LC_CTYPE", "LOGNAME", "SHELL", "TERM", "TMPDIR", "TZ", "USER",
];

/// Names the host may spell in mixed case that are passed on upper-cased.
#[cfg(windows)]
const UPPERCASED_VARIABLES: &[&str] = &[
    "COMMONPROGRAMFILES",
    "COMSPEC",
    "PROGRAMFILES",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "TMP",
    "WINDIR",
];

#[cfg(not(windows))]
const UPPERCASED_VARIABLES: &[&str] = &[];

#[cfg(windows)]
const SYSTEM_PATH: &[&str] = &[
    r"%SystemRoot%\System32",
    r"%SystemRoot%",
    r"%SystemRoot%\System32\Wbem",
    r"%SystemRoot%\System32\WindowsPowerShell\v1.0",
];

#[cfg(not(windows))]
const SYSTEM_PATH: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

pub const PATH_VARIABLE: &str = "PATH";

/// Identity published to the child.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub name: String,
    pub uuid: String,
    pub exe_path: PathBuf,
    pub base_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl ServiceIdentity {
    pub fn variables(&self) -> Vec<(OsString, OsString)> {
        vec![
            ("SVCBATCH_VERSION_ABI".into(), env!("CARGO_PKG_VERSION").into()),
            ("SVCBATCH_SERVICE_BASE".into(), self.base_dir.clone().into_os_string()),
            ("SVCBATCH_SERVICE_HOME".into(), self.work_dir.clone().into_os_string()),
            ("SVCBATCH_SERVICE_NAME".into(), self.name.clone().into()),
            ("SVCBATCH_SERVICE_SELF".into(), self.exe_path.clone().into_os_string()),
            ("SVCBATCH_SERVICE_UUID".into(), self.uuid.clone().into()),
        ]
    }
}

/// Final child environment, sorted by name ignoring case.
///
/// Names and values are kept as the host spelled them, UTF-8 or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(OsString, OsString)>,
}

impl Environment {
    pub fn get(&self, name: &str) -> Option<&OsStr> {
        lookup(&self.vars, name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn into_vec(self) -> Vec<(OsString, OsString)> {
        self.vars
    }
}

/// Builds the child's environment from the host's.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentBuilder {
    allow_list: bool,
    clean_path: bool,
}

impl EnvironmentBuilder {
    pub fn new(allow_list: bool, clean_path: bool) -> Self {
        Self {
            allow_list,
            clean_path,
        }
    }

    /// Host environment of this process.
    pub fn host_variables() -> Vec<(OsString, OsString)> {
        std::env::vars_os().collect()
    }

    pub fn build(&self, host: &[(OsString, OsString)], identity: &ServiceIdentity) -> Environment {
        let reserved = identity.variables();
        let mut seen: HashSet<String> = HashSet::new();
        let mut vars: Vec<(OsString, OsString)> =
            Vec::with_capacity(host.len() + reserved.len() + 1);

        for (name, value) in host {
            let key = name.to_string_lossy();
            // Per-drive current directories ("=C:") and the like
            if key.is_empty() || key.starts_with('=') {
                continue;
            }
            if key.eq_ignore_ascii_case(PATH_VARIABLE) {
                continue;
            }
            if reserved.iter().any(|(k, _)| same_name(k, &key)) {
                continue;
            }
            if self.allow_list && !is_allowed(&key) {
                continue;
            }
            if !seen.insert(key.to_ascii_uppercase()) {
                continue;
            }
            vars.push((canonical_name(name, &key), value.clone()));
        }

        let path = if self.clean_path {
            Some(clean_path(host, identity))
        } else {
            lookup(host, PATH_VARIABLE).and_then(normalize_path_value)
        };
        if let Some(path) = path {
            vars.push((PATH_VARIABLE.into(), path));
        }

        vars.extend(reserved);
        vars.sort_by(|(a, _), (b, _)| compare_names(a, b));
        Environment { vars }
    }
}

fn is_allowed(name: &str) -> bool {
    ALLOWED_VARIABLES.iter().any(|n| n.eq_ignore_ascii_case(name))
}

fn same_name(name: &OsStr, other: &str) -> bool {
    name.to_str().is_some_and(|n| n.eq_ignore_ascii_case(other))
}

fn canonical_name(name: &OsStr, key: &str) -> OsString {
    match UPPERCASED_VARIABLES.iter().find(|n| n.eq_ignore_ascii_case(key)) {
        Some(upper) => OsString::from(*upper),
        None => name.to_os_string(),
    }
}

fn compare_names(a: &OsStr, b: &OsStr) -> Ordering {
    let (a, b) = (a.to_string_lossy(), b.to_string_lossy());
    let upper_a = a.chars().flat_map(char::to_uppercase);
    let upper_b = b.chars().flat_map(char::to_uppercase);
    upper_a.cmp(upper_b).then_with(|| a.cmp(&b))
}

fn lookup<'a>(vars: &'a [(OsString, OsString)], name: &str) -> Option<&'a OsStr> {
    vars.iter()
        .find(|(k, _)| same_name(k, name))
        .map(|(_, v)| v.as_os_str())
}

/// Base directory, working directory and the system directories.
fn clean_path(host: &[(OsString, OsString)], identity: &ServiceIdentity) -> OsString {
    let mut parts = vec![identity.base_dir.clone().into_os_string()];
    if identity.work_dir != identity.base_dir {
        parts.push(identity.work_dir.clone().into_os_string());
    }
    parts.extend(SYSTEM_PATH.iter().map(|p| expand_variables(p, host)));

    let mut joined = OsString::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            joined.push(path_separator().to_string());
        }
        joined.push(part);
    }
    normalize_path_value(&joined).unwrap_or(joined)
}

/// Normalized copy of a `PATH` value that is valid UTF-8; anything else
/// passes through untouched.
fn normalize_path_value(value: &OsStr) -> Option<OsString> {
    match value.to_str() {
        Some(text) => normalize_path_list(text).map(OsString::from),
        None => Some(value.to_os_string()),
    }
}

fn path_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

/// Normalize a `PATH` value: unify directory separators, drop trailing
/// separators and empty entries. `None` if nothing is left.
pub fn normalize_path_list(value: &str) -> Option<String> {
    let separator = path_separator();
    let entries: Vec<String> = value
        .split(separator)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(normalize_path_entry)
        .collect();
    if entries.is_empty() {
        None
    } else {
        Some(entries.join(&separator.to_string()))
    }
}

fn normalize_path_entry(entry: &str) -> String {
    if cfg!(windows) {
        let unified = entry.replace('/', "\\");
        let trimmed = unified.trim_end_matches('\\');
        // "C:\" must keep its separator, "C:" means the drive's current directory
        if trimmed.is_empty() || trimmed.ends_with(':') {
            format!("{}\\", trimmed)
        } else {
            trimmed.to_string()
        }
    } else {
        let trimmed = entry.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// Expand `%NAME%` references from `host`; unknown references stay verbatim.
pub fn expand_variables(text: &str, host: &[(OsString, OsString)]) -> OsString {
    let mut out = OsString::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('%') {
        out.push(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(host, name) {
                    Some(value) => out.push(value),
                    None => out.push(format!("%{}%", name)),
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push("%");
                rest = after;
            }
        }
    }
    out.push(rest);
    out
}
