//! Line-oriented operator console: stands in for the microphone and the
//! page, turning typed lines into actions and snapshots into text.

use crate::controller::{OperatorAction, SessionSnapshot};
use sticktator_core::interaction::InteractionState;
use sticktator_core::transcript::RecognitionResult;

pub const HELP: &str = "\
commands:
  machines            refresh and list machines
  use <machine>       select the target machine
  listen              start capturing an utterance
  <text>              speak a final phrase while listening
  ~<text>             speak an interim phrase while listening
  stop                stop capturing
  send [machine]      translate and dispatch the utterance
  done                mark the running command as finished
  report              store a report of the execution
  reports             list stored reports
  show <id>           show one report
  reset               discard the current interaction
  quit                leave";

/// What one typed line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Act(Vec<OperatorAction>),
    ListReports,
    ShowReport(String),
    Help,
    Quit,
    Nothing,
}

/// Accumulates typed speech into recognizer result lists.
#[derive(Debug, Default)]
pub struct Console {
    results: Vec<RecognitionResult>,
}

impl Console {
    pub fn interpret(&mut self, line: &str) -> Input {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();

        match (head, rest.as_slice()) {
            ("", _) => Input::Nothing,
            ("help", []) => Input::Help,
            ("quit" | "exit", []) => Input::Quit,
            ("machines", []) => Input::Act(vec![OperatorAction::RefreshMachines]),
            ("use", [name]) => Input::Act(vec![OperatorAction::SelectMachine(name.to_string())]),
            ("listen", []) => {
                self.results.clear();
                Input::Act(vec![OperatorAction::StartCapture])
            }
            ("stop", []) => Input::Act(vec![OperatorAction::StopCapture]),
            ("send", []) => Input::Act(vec![OperatorAction::Send]),
            ("send", [name]) => Input::Act(vec![
                OperatorAction::SelectMachine(name.to_string()),
                OperatorAction::Send,
            ]),
            ("done", []) => Input::Act(vec![OperatorAction::Complete]),
            ("report", []) => Input::Act(vec![OperatorAction::CreateReport]),
            ("reports", []) => Input::ListReports,
            ("show", [id]) => Input::ShowReport(id.to_string()),
            ("reset", []) => {
                self.results.clear();
                Input::Act(vec![OperatorAction::Reset])
            }
            _ => Input::Act(vec![OperatorAction::Recognized(self.speak(line))]),
        }
    }

    /// Records a spoken phrase. A leading `~` marks it interim, replacing
    /// any previous interim phrase.
    fn speak(&mut self, line: &str) -> Vec<RecognitionResult> {
        if matches!(self.results.last(), Some(last) if !last.is_final) {
            self.results.pop();
        }
        let (text, is_final) = match line.strip_prefix('~') {
            Some(interim) => (interim.trim(), false),
            None => (line, true),
        };
        let text = if self.results.is_empty() {
            text.to_string()
        } else {
            format!(" {}", text)
        };
        self.results.push(if is_final {
            RecognitionResult::finalized(text)
        } else {
            RecognitionResult::interim(text)
        });
        self.results.clone()
    }
}

/// Lines describing what changed between two snapshots.
pub fn render(prev: Option<&SessionSnapshot>, next: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.map(|p| p.channel) != Some(next.channel) {
        lines.push(format!("[channel] {}", next.channel));
    }
    if prev.map(|p| &p.machines) != Some(&next.machines)
        || prev.map(|p| &p.registry_error) != Some(&next.registry_error)
    {
        match (&next.machines, &next.registry_error) {
            (_, Some(error)) => lines.push(format!("[machines] {}", error)),
            (None, None) => lines.push("[machines] waiting for snapshot".to_string()),
            (Some(machines), None) if machines.is_empty() => {
                lines.push("[machines] none".to_string())
            }
            (Some(machines), None) => {
                for machine in machines {
                    lines.push(format!("[machines] {} ({})", machine.name, machine.status));
                }
            }
        }
    }
    if prev.map(|p| &p.target_machine) != Some(&next.target_machine) {
        if let Some(target) = &next.target_machine {
            lines.push(format!("[target] {}", target));
        }
    }
    if prev.map(|p| p.state) != Some(next.state) {
        lines.push(format!("[{}]", next.state));
        if next.state == InteractionState::Reviewing {
            match &next.utterance {
                Some(utterance) => lines.push(format!("  \"{}\"", utterance)),
                None => lines.push("  nothing captured".to_string()),
            }
        }
    }
    if next.state == InteractionState::Listening
        && prev.map(|p| &p.transcript) != Some(&next.transcript)
    {
        let heard = next.transcript.display_text();
        if !heard.is_empty() {
            lines.push(format!("  ... {}", heard.trim()));
        }
    }

    let seen = match prev {
        Some(p) if p.generation == next.generation && p.log.len() <= next.log.len() => p.log.len(),
        _ => 0,
    };
    for event in &next.log[seen..] {
        lines.push(format!("  {}: {}", event.kind.label(), event.summary()));
    }

    if let Some(error) = &next.last_error {
        if prev.and_then(|p| p.last_error.as_ref()) != Some(error) {
            lines.push(format!("[error] {}", error));
        }
    }
    if let Some(report) = &next.report {
        if prev.and_then(|p| p.report.as_ref()) != Some(report) {
            lines.push(format!("[report] {} {}", report.navigable_id(), report.url));
        }
    }
    if let Some(notice) = &next.notice {
        if prev.and_then(|p| p.notice.as_ref()) != Some(notice) {
            lines.push(format!("[!] {}", notice));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use serde_json::json;
    use sticktator_core::execution::ExecutionEvent;
    use sticktator_core::transcript::TranscriptState;

    fn idle() -> SessionSnapshot {
        SessionSnapshot {
            generation: 0,
            state: InteractionState::Idle,
            channel: ChannelState::Connecting,
            input_enabled: true,
            transcript: TranscriptState::default(),
            utterance: None,
            target_machine: None,
            machines: None,
            registry_error: None,
            log: Vec::new(),
            last_error: None,
            report: None,
            report_pending: false,
            notice: None,
        }
    }

    #[test]
    fn test_commands() {
        let mut console = Console::default();
        assert_eq!(console.interpret("  "), Input::Nothing);
        assert_eq!(console.interpret("quit"), Input::Quit);
        assert_eq!(console.interpret("show abc"), Input::ShowReport("abc".into()));
        assert_eq!(
            console.interpret("send lab-pi"),
            Input::Act(vec![
                OperatorAction::SelectMachine("lab-pi".into()),
                OperatorAction::Send
            ])
        );
        assert_eq!(
            console.interpret("done"),
            Input::Act(vec![OperatorAction::Complete])
        );
    }

    #[test]
    fn test_speech_lines_build_the_full_result_list() {
        let mut console = Console::default();
        console.interpret("listen");
        assert_eq!(
            console.interpret("~turn on"),
            Input::Act(vec![OperatorAction::Recognized(vec![
                RecognitionResult::interim("turn on")
            ])])
        );
        assert_eq!(
            console.interpret("turn on the light"),
            Input::Act(vec![OperatorAction::Recognized(vec![
                RecognitionResult::finalized("turn on the light")
            ])])
        );
        // Phrases that merely start with a command word are speech.
        assert_eq!(
            console.interpret("stop the server"),
            Input::Act(vec![OperatorAction::Recognized(vec![
                RecognitionResult::finalized("turn on the light"),
                RecognitionResult::finalized(" stop the server"),
            ])])
        );

        console.interpret("listen");
        assert_eq!(
            console.interpret("uptime"),
            Input::Act(vec![OperatorAction::Recognized(vec![
                RecognitionResult::finalized("uptime")
            ])])
        );
    }

    #[test]
    fn test_render_reports_changes_only() {
        let first = idle();
        let lines = render(None, &first);
        assert!(lines.contains(&"[channel] connecting".to_string()));
        assert!(lines.contains(&"[machines] waiting for snapshot".to_string()));
        assert!(lines.contains(&"[idle]".to_string()));
        assert!(render(Some(&first), &first).is_empty());

        let mut reviewing = first.clone();
        reviewing.state = InteractionState::Reviewing;
        reviewing.utterance = Some("turn on the light".into());
        assert_eq!(
            render(Some(&first), &reviewing),
            vec!["[reviewing]".to_string(), "  \"turn on the light\"".to_string()]
        );
    }

    #[test]
    fn test_render_prints_new_log_events() {
        let mut executing = idle();
        executing.state = InteractionState::Executing;
        executing
            .log
            .push(ExecutionEvent::new(json!({"type": "command_output", "command": "ls", "output": "a"})));

        let mut next = executing.clone();
        next.log
            .push(ExecutionEvent::new(json!({"type": "command_error", "command": "ls", "error": "b"})));

        assert_eq!(
            render(Some(&executing), &next),
            vec!["  Command Error: ls -> b".to_string()]
        );
    }
}
