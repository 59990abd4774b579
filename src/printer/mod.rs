//! Printers: text and markdown (termimad).

use owo_colors::OwoColorize;
use termimad::MadSkin;

use crate::pipeline::CodeGenResult;
use crate::service::AnswerEnvelope;

pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    pub fn print(&self, text: &str) {
        match self.color {
            Some("green") => println!("{}", text.green()),
            Some("cyan") => println!("{}", text.cyan()),
            Some("yellow") => println!("{}", text.yellow()),
            Some("red") => println!("{}", text.red()),
            _ => println!("{}", text),
        }
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// One line per generated file, relative to the request directory.
pub fn artifact_lines(env: &AnswerEnvelope) -> Vec<String> {
    let graphics = env.html_files.keys().map(|n| format!("graphics_output/{}", n));
    let tables = env.table_files.keys().map(|n| format!("tables_output/{}", n));
    graphics.chain(tables).collect()
}

pub fn print_answer(env: &AnswerEnvelope, markdown: bool) {
    if markdown {
        MarkdownPrinter::default().print(&env.message);
    } else {
        TextPrinter { color: None }.print(&env.message);
    }

    let files = artifact_lines(env);
    if !files.is_empty() {
        let header = TextPrinter { color: Some("cyan") };
        header.print(&format!("Generated files in {}:", env.output_dir.display()));
        for f in files {
            println!("  {}", f);
        }
    }
    if matches!(env.result, Some(CodeGenResult::FailedError | CodeGenResult::FailedEvaluation)) {
        TextPrinter { color: Some("yellow") }.print(&format!("(gave up after {} attempts)", env.attempts));
    }
}
