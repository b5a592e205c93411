//! Review transports: how a suspended gate reaches a human and hears back.

use std::io::{BufRead, Write};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::core::types::{ReviewCheckpoint, ReviewDecision};

/// Delivers a checkpoint and blocks until a decision arrives.
pub trait ReviewTransport {
    fn request_decision(&self, checkpoint: &ReviewCheckpoint) -> Result<ReviewDecision>;
}

/// Returns a fixed decision without asking anyone.
#[derive(Debug, Clone)]
pub struct AutoReviewer {
    decision: ReviewDecision,
}

impl AutoReviewer {
    pub fn proceed() -> Self {
        Self {
            decision: ReviewDecision::Proceed,
        }
    }

    pub fn reject(reason: &str) -> Self {
        Self {
            decision: ReviewDecision::reject(reason),
        }
    }
}

impl ReviewTransport for AutoReviewer {
    fn request_decision(&self, checkpoint: &ReviewCheckpoint) -> Result<ReviewDecision> {
        debug!(gate = %checkpoint.gate, decision = ?self.decision, "auto review");
        Ok(self.decision.clone())
    }
}

const MAX_PROMPTS: usize = 3;

/// Prints the checkpoint and reads `y`/`n` answers line by line.
pub struct TerminalReviewer<R, W> {
    input: Mutex<R>,
    output: Mutex<W>,
}

impl<R: BufRead, W: Write> TerminalReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }
}

impl TerminalReviewer<std::io::BufReader<std::io::Stdin>, std::io::Stderr> {
    /// Reviewer on the process terminal; prompts go to stderr so stdout stays JSON.
    pub fn stdio() -> Self {
        Self::new(
            std::io::BufReader::new(std::io::stdin()),
            std::io::stderr(),
        )
    }
}

impl<R: BufRead, W: Write> ReviewTransport for TerminalReviewer<R, W> {
    fn request_decision(&self, checkpoint: &ReviewCheckpoint) -> Result<ReviewDecision> {
        let mut input = self
            .input
            .lock()
            .map_err(|_| anyhow!("review input lock poisoned"))?;
        let mut output = self
            .output
            .lock()
            .map_err(|_| anyhow!("review output lock poisoned"))?;

        write_checkpoint(&mut *output, checkpoint).context("print checkpoint")?;
        for _ in 0..MAX_PROMPTS {
            write!(output, "{} [y/n] ", checkpoint.question).context("print prompt")?;
            output.flush().context("flush prompt")?;
            match read_answer(&mut *input)?.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(ReviewDecision::Proceed),
                "n" | "no" => {
                    write!(output, "Reason (optional): ").context("print prompt")?;
                    output.flush().context("flush prompt")?;
                    let reason = read_answer(&mut *input)?;
                    return Ok(ReviewDecision::Reject {
                        reason: (!reason.is_empty()).then_some(reason),
                    });
                }
                other => {
                    warn!(answer = %other, "unrecognized review answer");
                    writeln!(output, "Please answer y or n.").context("print prompt")?;
                }
            }
        }
        Err(anyhow!("no valid answer after {MAX_PROMPTS} prompts"))
    }
}

fn write_checkpoint<W: Write + ?Sized>(out: &mut W, checkpoint: &ReviewCheckpoint) -> Result<()> {
    writeln!(out, "\n== {} ==", checkpoint.title)?;
    writeln!(out, "run: {}", checkpoint.context.run_id)?;
    writeln!(
        out,
        "summary:\n{}",
        serde_json::to_string_pretty(&checkpoint.context.summary)?
    )?;
    if !checkpoint.context.files.is_empty() {
        writeln!(out, "files:")?;
        for file in &checkpoint.context.files {
            writeln!(out, "  - {} ({}, {})", file.label, file.path, file.format)?;
        }
    }
    Ok(())
}

fn read_answer<R: BufRead + ?Sized>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = input.read_line(&mut line).context("read review answer")?;
    if n == 0 {
        return Err(anyhow!("review input closed before a decision"));
    }
    Ok(line.trim().to_string())
}

/// A checkpoint waiting for an answer on the far side of a [`ChannelReviewer`].
#[derive(Debug)]
pub struct ReviewRequest {
    pub checkpoint: ReviewCheckpoint,
    reply: Sender<ReviewDecision>,
}

impl ReviewRequest {
    /// Resume the suspended run.
    pub fn respond(self, decision: ReviewDecision) -> Result<()> {
        self.reply
            .send(decision)
            .map_err(|_| anyhow!("run for gate '{}' is no longer waiting", self.checkpoint.gate))
    }
}

/// Hands checkpoints to another thread and blocks on its reply.
#[derive(Debug, Clone)]
pub struct ChannelReviewer {
    requests: Sender<ReviewRequest>,
    timeout: Option<Duration>,
}

/// Create a channel transport and the receiving end reviewers listen on.
///
/// With a `timeout`, an unanswered checkpoint resolves as a rejection.
pub fn review_channel(timeout: Option<Duration>) -> (ChannelReviewer, Receiver<ReviewRequest>) {
    let (requests, receiver) = mpsc::channel();
    (ChannelReviewer { requests, timeout }, receiver)
}

impl ReviewTransport for ChannelReviewer {
    fn request_decision(&self, checkpoint: &ReviewCheckpoint) -> Result<ReviewDecision> {
        let (reply, answer) = mpsc::channel();
        self.requests
            .send(ReviewRequest {
                checkpoint: checkpoint.clone(),
                reply,
            })
            .map_err(|_| anyhow!("review channel closed"))?;

        match self.timeout {
            None => answer
                .recv()
                .map_err(|_| anyhow!("reviewer dropped gate '{}' without a decision", checkpoint.gate)),
            Some(timeout) => match answer.recv_timeout(timeout) {
                Ok(decision) => Ok(decision),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(gate = %checkpoint.gate, timeout_secs = timeout.as_secs(), "review timed out");
                    Ok(ReviewDecision::Reject {
                        reason: Some(format!("review timed out after {}s", timeout.as_secs())),
                    })
                }
                Err(RecvTimeoutError::Disconnected) => Err(anyhow!(
                    "reviewer dropped gate '{}' without a decision",
                    checkpoint.gate
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ArtifactRef, CheckpointContext};
    use std::io::Cursor;
    use std::thread;

    fn checkpoint() -> ReviewCheckpoint {
        ReviewCheckpoint {
            gate: "final-review".to_string(),
            question: "Approve the memory plan?".to_string(),
            title: "Memory plan".to_string(),
            context: CheckpointContext {
                run_id: "run-1".to_string(),
                summary: serde_json::json!({"total_ram_kb": 96}),
                files: vec![ArtifactRef::new("out/map.md", "markdown", "Memory map")],
            },
        }
    }

    #[test]
    fn terminal_reviewer_accepts_yes() {
        let reviewer = TerminalReviewer::new(Cursor::new(b"y\n".to_vec()), Vec::new());
        assert_eq!(
            reviewer.request_decision(&checkpoint()).expect("decision"),
            ReviewDecision::Proceed
        );
        let printed = String::from_utf8(reviewer.output.into_inner().expect("lock")).expect("utf8");
        assert!(printed.contains("== Memory plan =="));
        assert!(printed.contains("Memory map (out/map.md, markdown)"));
    }

    #[test]
    fn terminal_reviewer_reads_reject_reason_after_retry() {
        let reviewer = TerminalReviewer::new(
            Cursor::new(b"maybe\nno\nRAM budget too tight\n".to_vec()),
            Vec::new(),
        );
        assert_eq!(
            reviewer.request_decision(&checkpoint()).expect("decision"),
            ReviewDecision::reject("RAM budget too tight")
        );
    }

    #[test]
    fn terminal_reviewer_errors_on_closed_input() {
        let reviewer = TerminalReviewer::new(Cursor::new(Vec::new()), Vec::new());
        let err = reviewer.request_decision(&checkpoint()).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn channel_reviewer_round_trips_decision() {
        let (reviewer, requests) = review_channel(None);
        let handle = thread::spawn(move || {
            let request = requests.recv().expect("request");
            assert_eq!(request.checkpoint.gate, "final-review");
            request.respond(ReviewDecision::Proceed).expect("respond");
        });
        assert_eq!(
            reviewer.request_decision(&checkpoint()).expect("decision"),
            ReviewDecision::Proceed
        );
        handle.join().expect("reviewer thread");
    }

    #[test]
    fn channel_reviewer_timeout_rejects() {
        let (reviewer, _requests) = review_channel(Some(Duration::from_millis(20)));
        let decision = reviewer.request_decision(&checkpoint()).expect("decision");
        assert!(matches!(decision, ReviewDecision::Reject { reason: Some(r) } if r.contains("timed out")));
    }

    #[test]
    fn channel_reviewer_errors_when_nobody_listens() {
        let (reviewer, requests) = review_channel(None);
        drop(requests);
        assert!(reviewer.request_decision(&checkpoint()).is_err());
    }
}
