//! Bypass prevention: eval, variable-headed commands, pipe-to-shell, shell
//! `-c` execution and inline interpreters with network access.

use crate::bash::{ParsedCommand, is_pipe_to_shell};
use crate::checks::{Check, CheckResult};
use crate::config::Policy;

const CHECK_NAME: &str = "bypass_check";

pub struct BypassCheck {
    policy: Policy,
}

impl BypassCheck {
    #[must_use]
    pub fn new(policy: &Policy) -> Self {
        Self {
            policy: policy.clone(),
        }
    }

    fn check_hard_blocked(&self, commands: &[ParsedCommand]) -> CheckResult {
        for cmd in commands {
            for blocked in &self.policy.bypass_prevention.hard_blocked {
                if &cmd.command == blocked {
                    return CheckResult::deny(
                        CHECK_NAME,
                        format!("Command '{blocked}' is blocked (potential bypass)"),
                        "Use explicit commands instead of eval/exec.",
                    );
                }
            }
        }
        CheckResult::allow(CHECK_NAME)
    }

    fn check_variable_as_command(&self, commands: &[ParsedCommand]) -> CheckResult {
        if !self.policy.bypass_prevention.block_variable_as_command {
            return CheckResult::allow(CHECK_NAME);
        }
        for cmd in commands {
            if cmd.variable_as_command {
                return CheckResult::deny(
                    CHECK_NAME,
                    "Variable used as command (potential bypass)",
                    "Use explicit commands. Variable expansion as command is blocked.",
                );
            }
        }
        CheckResult::allow(CHECK_NAME)
    }

    fn check_pipe_to_shell(&self, commands: &[ParsedCommand]) -> CheckResult {
        let shells = &self.policy.bypass_prevention.block_shell_pipe_targets;
        if is_pipe_to_shell(commands, shells) {
            return CheckResult::deny(
                CHECK_NAME,
                "Piping to shell detected (dangerous pattern)",
                "Cannot pipe to shell. Download file first, review, then execute.",
            );
        }
        CheckResult::allow(CHECK_NAME)
    }

    fn check_shell_exec(&self, raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        for pattern in &self.policy.bypass_prevention.block_shell_exec_patterns {
            if raw.contains(pattern.as_str()) {
                return CheckResult::deny(
                    CHECK_NAME,
                    format!("Shell exec pattern detected: {pattern}"),
                    "Direct shell execution with -c is blocked. Run commands directly.",
                );
            }
        }

        // Structural detection, in case the textual pattern was dodged
        // through quoting or extra flags.
        for cmd in commands {
            match cmd.command.as_str() {
                "sh" | "bash" | "zsh" | "dash" | "ksh" | "ash" => {
                    if cmd.flags.iter().any(|f| f == "-c") {
                        return CheckResult::deny(
                            CHECK_NAME,
                            format!("Shell exec detected: {} -c", cmd.command),
                            "Direct shell execution is blocked. Run the inner command directly.",
                        );
                    }
                }
                "env" => {
                    if cmd
                        .args
                        .iter()
                        .any(|a| a == "bash" || a == "sh" || a == "zsh")
                    {
                        return CheckResult::deny(
                            CHECK_NAME,
                            "env shell execution detected",
                            "Shell execution via env is blocked.",
                        );
                    }
                }
                "busybox" => {
                    if cmd.args.iter().any(|a| a == "sh") {
                        return CheckResult::deny(
                            CHECK_NAME,
                            "busybox shell execution detected",
                            "Shell execution via busybox is blocked.",
                        );
                    }
                }
                _ => {}
            }
        }

        CheckResult::allow(CHECK_NAME)
    }

    fn check_interpreter_network(&self, raw: &str) -> CheckResult {
        let bp = &self.policy.bypass_prevention;

        let inline_interpreter = bp
            .confirm_interpreter_inline_with_network
            .iter()
            .any(|p| raw.contains(p.as_str()));
        if !inline_interpreter {
            return CheckResult::allow(CHECK_NAME);
        }

        let has_network = bp.network_patterns.iter().any(|p| raw.contains(p.as_str()));
        let has_obfuscation = bp
            .obfuscation_patterns
            .iter()
            .any(|p| raw.contains(p.as_str()));
        let has_rce = bp
            .rce_patterns_require_network
            .iter()
            .any(|p| raw.contains(p.as_str()));

        if has_network {
            return CheckResult::ask(
                CHECK_NAME,
                "Inline interpreter code with network calls detected",
                "This code makes network calls. Verify it's safe before allowing.",
            );
        }
        if has_obfuscation {
            return CheckResult::ask(
                CHECK_NAME,
                "Inline interpreter code with potential obfuscation detected",
                "This code uses import obfuscation. Verify it's safe.",
            );
        }
        if has_rce && has_network {
            return CheckResult::ask(
                CHECK_NAME,
                "Potential RCE pattern with network access detected",
                "This code pattern could execute remote code. Verify carefully.",
            );
        }

        CheckResult::allow(CHECK_NAME)
    }
}

impl Check for BypassCheck {
    fn name(&self) -> &'static str {
        CHECK_NAME
    }

    fn check_command(&mut self, raw: &str, commands: &[ParsedCommand]) -> CheckResult {
        let result = self.check_hard_blocked(commands);
        if !result.is_allowed() {
            return result;
        }

        let result = self.check_variable_as_command(commands);
        if !result.is_allowed() {
            return result;
        }

        let result = self.check_pipe_to_shell(commands);
        if !result.is_allowed() {
            return result;
        }

        let result = self.check_shell_exec(raw, commands);
        if !result.is_allowed() {
            return result;
        }

        self.check_interpreter_network(raw)
    }
}
