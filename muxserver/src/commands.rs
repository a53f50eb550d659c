//! Interactive command handlers for the stream server.
//!
//! Commands execute inline on the loop thread, so every handler here must be
//! short and non-blocking. Anything long-running belongs elsewhere.

use crate::stats::LoopStats;
use chrono::Utc;

/// Verbs that must complete within the interactive budget.
const INTERACTIVE_VERBS: [&str; 4] = ["ECHO", "TIME", "HELP", "STATUS"];

const HELP_TEXT: &str = "Commands: ECHO <text>, TIME, STATUS, HELP, CLOSE";

/// One executed command: the reply line and whether to close after the reply
/// has drained.
#[derive(Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: String,
    pub close: bool,
}

impl CommandOutcome {
    fn reply(text: impl Into<String>) -> CommandOutcome {
        CommandOutcome {
            reply: text.into(),
            close: false,
        }
    }
}

pub fn is_interactive(verb: &str) -> bool {
    INTERACTIVE_VERBS.contains(&verb)
}

/// Dispatches one complete command line.
pub fn execute(line: &str, stats: &LoopStats) -> CommandOutcome {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("").to_uppercase();
    let args: Vec<&str> = parts.collect();

    match verb.as_str() {
        "ECHO" => CommandOutcome::reply(args.join(" ")),
        "TIME" => CommandOutcome::reply(Utc::now().to_rfc3339()),
        "STATUS" => CommandOutcome::reply(stats.to_json()),
        "HELP" => CommandOutcome::reply(HELP_TEXT),
        "CLOSE" => CommandOutcome {
            reply: "Connection closing...".to_string(),
            close: true,
        },
        "" => CommandOutcome::reply("Error: empty command"),
        other => CommandOutcome::reply(format!("Error: unknown command: {}", other)),
    }
}
