//! Human checkpoint gate
//!
//! Every N cycles the reflector asks an operator whether to keep going. When
//! stdin is not a terminal the console gate answers "continue" at once.

use std::io::{BufRead, IsTerminal, Write};

use async_trait::async_trait;
use colored::Colorize;
use log::{info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::domain::Run;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Continue,
    Abort,
}

#[async_trait]
pub trait HumanGate: Send + Sync {
    /// Ask whether the run may continue past its current cycle
    async fn confirm(&self, run: &Run, cancel: &CancellationToken) -> GateDecision;
}

/// Always continues
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl HumanGate for AutoApprove {
    async fn confirm(&self, _run: &Run, _cancel: &CancellationToken) -> GateDecision {
        GateDecision::Continue
    }
}

/// Prompts on the terminal; auto-continues when stdin is not interactive.
///
/// Answers are read on a dedicated thread and handed over a channel, so a
/// pending prompt never holds up runtime shutdown after cancellation.
#[derive(Debug)]
pub struct ConsoleGate {
    interactive: bool,
    lines: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Default for ConsoleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleGate {
    pub fn new() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
            lines: Mutex::new(None),
        }
    }

    /// Gate that takes its answers from `lines` instead of the terminal
    pub fn from_lines(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            interactive: true,
            lines: Mutex::new(Some(lines)),
        }
    }

    fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("planloop-stdin".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("ConsoleGate: failed to start stdin reader: {}", e);
        }
        rx
    }

    fn parse_answer(line: &str) -> GateDecision {
        match line.trim().to_lowercase().as_str() {
            "n" | "no" | "q" | "quit" | "abort" => GateDecision::Abort,
            _ => GateDecision::Continue,
        }
    }
}

#[async_trait]
impl HumanGate for ConsoleGate {
    async fn confirm(&self, run: &Run, cancel: &CancellationToken) -> GateDecision {
        if !self.interactive {
            info!("ConsoleGate: stdin is not a terminal, continuing run {}", run.id);
            return GateDecision::Continue;
        }

        let question = format!(
            "{} run {} completed cycle {} ({}s elapsed). Continue? [Y/n] ",
            "checkpoint:".yellow().bold(),
            run.id,
            run.cycle,
            run.elapsed().as_secs()
        );
        let mut stdout = std::io::stdout();
        if stdout.write_all(question.as_bytes()).is_err() || stdout.flush().is_err() {
            return GateDecision::Continue;
        }

        let mut guard = self.lines.lock().await;
        let lines = guard.get_or_insert_with(Self::spawn_stdin_reader);
        tokio::select! {
            _ = cancel.cancelled() => GateDecision::Abort,
            line = lines.recv() => match line {
                // Closed channel means nobody is there to answer
                None => GateDecision::Continue,
                Some(line) => Self::parse_answer(&line),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_answer() {
        assert_eq!(ConsoleGate::parse_answer("\n"), GateDecision::Continue);
        assert_eq!(ConsoleGate::parse_answer("y\n"), GateDecision::Continue);
        assert_eq!(ConsoleGate::parse_answer("N\n"), GateDecision::Abort);
        assert_eq!(ConsoleGate::parse_answer(" quit "), GateDecision::Abort);
    }

    #[tokio::test]
    async fn test_auto_approve() {
        let run = Run::new("r", "g");
        assert_eq!(
            AutoApprove.confirm(&run, &CancellationToken::new()).await,
            GateDecision::Continue
        );
    }

    #[tokio::test]
    async fn test_console_gate_reads_answers_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = ConsoleGate::from_lines(rx);
        let run = Run::new("r", "g");
        let cancel = CancellationToken::new();

        tx.send("yes".to_string()).unwrap();
        tx.send("n".to_string()).unwrap();
        assert_eq!(gate.confirm(&run, &cancel).await, GateDecision::Continue);
        assert_eq!(gate.confirm(&run, &cancel).await, GateDecision::Abort);

        drop(tx);
        assert_eq!(gate.confirm(&run, &cancel).await, GateDecision::Continue);
    }

    #[tokio::test]
    async fn test_console_gate_cancellation_returns_promptly() {
        let (_tx, rx) = mpsc::unbounded_channel::<String>();
        let gate = ConsoleGate::from_lines(rx);
        let run = Run::new("r", "g");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let decision = tokio::time::timeout(Duration::from_secs(5), gate.confirm(&run, &cancel))
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::Abort);
    }
}
