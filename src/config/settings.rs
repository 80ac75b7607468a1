// src/config/settings.rs
//
// Hand-rolled reader/writer for `Settings.xml` (§6). The file holds exactly
// one self-closing element with three attributes, so a dependency on a full
// XML crate isn't warranted; this is a deliberate exception to "reach for
// the ecosystem crate" — there is no ecosystem crate elsewhere in this
// repo's dependency stack that this single attribute-scrape would justify
// pulling in.

use std::io;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub gather_interval_ms: u64,
    pub db_url: String,
    pub db_username: String,
}

impl Settings {
    pub fn defaults() -> Self {
        Self {
            gather_interval_ms: 1000,
            db_url: String::new(),
            db_username: String::new(),
        }
    }

    /// Load `Settings.xml`, creating it with defaults (empty URL/username)
    /// if it doesn't exist yet.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let settings = Self::defaults();
                settings.save(path)?;
                Ok(settings)
            }
            Err(e) => Err(e),
        }
    }

    fn parse(text: &str) -> Self {
        let gather_interval_ms = extract_attr(text, "gatherInterval")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);
        let db_url = extract_attr(text, "dbURL").unwrap_or_default();
        let db_username = extract_attr(text, "dbUsername").unwrap_or_default();
        Self {
            gather_interval_ms,
            db_url,
            db_username,
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let xml = format!(
            "<Settings gatherInterval=\"{}\" dbURL=\"{}\" dbUsername=\"{}\"/>\n",
            self.gather_interval_ms,
            xml_escape(&self.db_url),
            xml_escape(&self.db_username),
        );
        std::fs::write(path, xml)
    }
}

fn extract_attr(text: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = text.find(&needle)? + needle.len();
    let end = text[start..].find('"')?;
    Some(xml_unescape(&text[start..start + end]))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("diode-bridge-settings-test-{}-{}.xml", name, std::process::id()))
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let path = scratch_path("roundtrip");
        let original = Settings {
            gather_interval_ms: 2500,
            db_url: "mssql://db.internal:1433".to_string(),
            db_username: "svc_diode".to_string(),
        };
        original.save(&path).unwrap();
        let loaded = Settings::load_or_create(&path).unwrap();
        assert_eq!(loaded, original);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_creates_defaults() {
        let path = scratch_path("missing");
        fs::remove_file(&path).ok();
        let settings = Settings::load_or_create(&path).unwrap();
        assert_eq!(settings, Settings::defaults());
        assert!(path.exists());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn escapes_ampersand_in_db_url() {
        let path = scratch_path("escape");
        let original = Settings {
            gather_interval_ms: 1000,
            db_url: "mssql://db?opt=a&other=b".to_string(),
            db_username: String::new(),
        };
        original.save(&path).unwrap();
        let loaded = Settings::load_or_create(&path).unwrap();
        assert_eq!(loaded.db_url, original.db_url);
        fs::remove_file(&path).ok();
    }
}
