// Command-file tokenizer and parser.
//
// Turns one line of the command file into a `Command` the transaction
// manager can act on. This is the "external collaborator" side of the
// engine: it never touches lock state, it only recognizes the fixed verb
// set in section 4.5 and reports bad input as a diagnostic, per the
// input-error policy in section 7 (report and skip the line).

use tracing::warn;

use crate::common::SiteId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Begin(String),
    BeginReadOnly(String),
    Read(String, String),
    Write(String, String, i64),
    End(String),
    Fail(SiteId),
    Recover(SiteId),
    Dump,
}

/// Strips a `//` comment and splits the remainder into runs of word
/// characters, per section 6's input grammar.
pub fn tokenize(line: &str) -> Vec<String> {
    let code = match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    };
    code.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parses one tokenized line into a `Command`. Returns `None` for a blank
/// line, an unknown verb, or a malformed/out-of-range argument — each case
/// is logged as a diagnostic and the caller simply moves on to the next
/// line.
pub fn parse(tokens: &[String], site_count: usize) -> Option<Command> {
    let (verb, args) = tokens.split_first()?;

    match verb.as_str() {
        "begin" => args.first().cloned().map(Command::Begin),
        "beginRO" => args.first().cloned().map(Command::BeginReadOnly),
        "R" => match args {
            [tid, var] => Some(Command::Read(tid.clone(), var.clone())),
            _ => {
                warn!(?tokens, "malformed R command");
                None
            }
        },
        "W" => match args {
            [tid, var, value] => match value.parse::<i64>() {
                Ok(v) => Some(Command::Write(tid.clone(), var.clone(), v)),
                Err(_) => {
                    warn!(?tokens, "malformed W value");
                    None
                }
            },
            _ => {
                warn!(?tokens, "malformed W command");
                None
            }
        },
        "end" => args.first().cloned().map(Command::End),
        "fail" => parse_site(args, site_count).map(Command::Fail),
        "recover" => parse_site(args, site_count).map(Command::Recover),
        "dump" => Some(Command::Dump),
        other => {
            warn!(verb = other, "unrecognized command, skipping line");
            None
        }
    }
}

fn parse_site(args: &[String], site_count: usize) -> Option<SiteId> {
    let raw = args.first()?;
    let site: usize = raw.parse().ok()?;
    if site < 1 || site > site_count {
        warn!(site, site_count, "invalid site id, skipping line");
        return None;
    }
    Some(site)
}
