//! Inspect and patch PDF page content from the command line.
//!
//! Usage:
//!   pdf_patch scan <file> [--page N]
//!   pdf_patch chain <file>
//!   pdf_patch inspect <file>
//!   pdf_patch replace-text <file> <page> <run> <text> -o <out>
//!   pdf_patch nudge <file> <page> <xobject> <dx> <dy> -o <out>
//!
//! Page and run numbers are zero-based. Set `RUST_LOG=debug` for details.

use pdf_patch::content::Mutation;
use pdf_patch::tree::{to_json, ObjectTree};
use pdf_patch::xref::anchor_chain;
use pdf_patch::{DocumentEditor, EditableItem};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

const USAGE: &str = "Usage:
  pdf_patch scan <file> [--page N]
  pdf_patch chain <file>
  pdf_patch inspect <file>
  pdf_patch replace-text <file> <page> <run> <text> -o <out>
  pdf_patch nudge <file> <page> <xobject> <dx> <dy> -o <out>";

enum Command {
    Scan {
        file: PathBuf,
        page: Option<usize>,
    },
    Chain {
        file: PathBuf,
    },
    Inspect {
        file: PathBuf,
    },
    ReplaceText {
        file: PathBuf,
        page: usize,
        run: usize,
        text: String,
        output: PathBuf,
    },
    Nudge {
        file: PathBuf,
        page: usize,
        xobject: String,
        dx: f64,
        dy: f64,
        output: PathBuf,
    },
}

impl Command {
    fn from_args(args: &[String]) -> Result<Self, Box<dyn Error>> {
        let mut positional = Vec::new();
        let mut page = None;
        let mut output = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--page" => {
                    i += 1;
                    page = Some(args.get(i).ok_or("--page needs a value")?.parse::<usize>()?);
                },
                "-o" | "--output" => {
                    i += 1;
                    output = Some(PathBuf::from(args.get(i).ok_or("-o needs a path")?));
                },
                other => positional.push(other.to_string()),
            }
            i += 1;
        }

        let command = positional.first().map(String::as_str).ok_or(USAGE)?;
        let arg = |n: usize| positional.get(n).cloned().ok_or(USAGE);
        let out_path = || output.clone().ok_or("missing -o <out>");

        Ok(match command {
            "scan" => Command::Scan {
                file: arg(1)?.into(),
                page,
            },
            "chain" => Command::Chain { file: arg(1)?.into() },
            "inspect" => Command::Inspect { file: arg(1)?.into() },
            "replace-text" => Command::ReplaceText {
                file: arg(1)?.into(),
                page: arg(2)?.parse()?,
                run: arg(3)?.parse()?,
                text: arg(4)?,
                output: out_path()?,
            },
            "nudge" => Command::Nudge {
                file: arg(1)?.into(),
                page: arg(2)?.parse()?,
                xobject: arg(3)?,
                dx: arg(4)?.parse()?,
                dy: arg(5)?.parse()?,
                output: out_path()?,
            },
            _ => return Err(USAGE.into()),
        })
    }
}

fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Scan { file, page } => {
            let editor = DocumentEditor::open(fs::read(&file)?)?;
            let pages = page.map(|p| vec![p]);
            let items = editor.scan(pages.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        },
        Command::Chain { file } => {
            let data = fs::read(&file)?;
            for (i, anchor) in anchor_chain(&data)?.iter().enumerate() {
                println!(
                    "{:>3}  offset {:>10}  {:?}  /Size {}",
                    i,
                    anchor.offset,
                    anchor.kind,
                    anchor.size()
                );
            }
        },
        Command::Inspect { file } => {
            let tree = ObjectTree::parse(&fs::read(&file)?)?;
            println!("{}", serde_json::to_string_pretty(&to_json(&tree))?);
        },
        Command::ReplaceText {
            file,
            page,
            run,
            text,
            output,
        } => {
            let mut editor = DocumentEditor::open(fs::read(&file)?)?;
            let items = editor.scan(Some(&[page][..]))?;
            let target = items[0]
                .text_runs
                .get(run)
                .cloned()
                .ok_or_else(|| format!("page {} has {} text runs", page, items[0].text_runs.len()))?;
            println!("Replacing {:?}", target.text);
            editor.apply_mutation(&EditableItem::TextRun(target), &Mutation::ReplaceText { text })?;
            save(&mut editor, &output)?;
        },
        Command::Nudge {
            file,
            page,
            xobject,
            dx,
            dy,
            output,
        } => {
            let mut editor = DocumentEditor::open(fs::read(&file)?)?;
            let items = editor.scan(Some(&[page][..]))?;
            let target = items[0]
                .xobjects
                .iter()
                .find(|x| x.name == xobject)
                .cloned()
                .ok_or_else(|| format!("no /{} Do on page {}", xobject, page))?;
            editor.apply_mutation(&EditableItem::XObjectDraw(target), &Mutation::Translate { dx, dy })?;
            save(&mut editor, &output)?;
        },
    }
    Ok(())
}

fn save(editor: &mut DocumentEditor, output: &Path) -> Result<(), Box<dyn Error>> {
    let incremental = editor.is_incremental();
    let bytes = editor.save()?;
    fs::write(output, &bytes)?;
    println!(
        "Wrote {} ({} bytes, {})",
        output.display(),
        bytes.len(),
        if incremental { "incremental" } else { "full rewrite" }
    );
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let result = Command::from_args(&args).and_then(run);
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
