//! Interactive terminal chat.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::app::Responder;

fn is_exit_command(line: &str) -> bool {
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

/// Read questions from `input` until `exit`/`quit` or end of input.
///
/// Assistant errors end the session and are returned to the caller.
pub async fn run_chat<R, W>(responder: &dyn Responder, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "\nMultilingual chatbot is ready!")?;
    writeln!(out, "Type your question (type 'exit' to quit)\n")?;

    let mut lines = input.lines();
    loop {
        write!(out, "You: ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit_command(line) {
            writeln!(out, "Goodbye!")?;
            break;
        }

        let answer = responder.respond(line).await?;
        writeln!(out, "Bot: {answer}\n")?;
    }
    Ok(())
}
