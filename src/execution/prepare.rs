//! Text rewrites applied to generated code before it runs.

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::artifacts::{OutputDirs, GRAPHICS_DIR, TABLES_DIR};

fn write_html_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(\w+)\s*\.write_html\(\s*['"]([^'"]+\.html)['"]\s*\)"#).expect("valid write_html regex")
    })
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\b({}|{})\b", GRAPHICS_DIR, TABLES_DIR)).expect("valid placeholder regex")
    })
}

fn py_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace('\'', "\\'")
}

/// Point the directory placeholders at this request's directories, then add a
/// `write_json` dump into `dirs.json` after every figure saved as HTML.
pub fn prepare_code(code: &str, dirs: &OutputDirs) -> String {
    let graphics = py_path(&dirs.graphics);
    let tables = py_path(&dirs.tables);
    let code = placeholder_re().replace_all(code, |caps: &Captures| {
        if &caps[1] == GRAPHICS_DIR {
            graphics.clone()
        } else {
            tables.clone()
        }
    });
    add_json_dumps(&code, &py_path(&dirs.json))
}

fn add_json_dumps(code: &str, json_dir: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for (i, line) in code.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
        let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
        for caps in write_html_re().captures_iter(line) {
            let figure = &caps[1];
            let stem = Path::new(&caps[2])
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.push_str(&format!(
                "\n{}{}.write_json('{}/{}.json', pretty=True)",
                indent, figure, json_dir, stem
            ));
        }
    }
    out
}
