//! Bash command parsing.
//!
//! The primary parser is the tree-sitter bash grammar, which gives
//! full-fidelity handling of quoting, escapes, heredocs and compound
//! commands. When the grammar rejects the input the parser degrades to a
//! quote-respecting splitter so the checks always receive *something* to
//! inspect.
//!
//! Two representation decisions matter to the checks:
//!
//! - Pipelines are represented twice: each stage links to the next via
//!   `pipes_to`, *and* every stage appears in the returned flat sequence.
//!   Chain-walking checks (pipe-to-shell) use the former, per-command
//!   filters use the latter.
//! - Command and process substitutions (`$(…)`, backticks, `<(…)`, `>(…)`)
//!   are surfaced as additional top-level commands, never nested. A command
//!   hidden inside `echo $(rm -rf ~)` is inspected exactly like a bare one.

use tree_sitter::{Node, Parser};

/// One invoked executable in a parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Executable as written (`git`, `./run.sh`, `$TOOL`).
    pub command: String,
    /// Positional arguments in source order.
    pub args: Vec<String>,
    /// Flag-shaped tokens, preserved as written (`-rfv`, `--force`).
    pub flags: Vec<String>,
    /// File targets of `>`, `>>`, `<`, `&>` redirections.
    pub redirects: Vec<String>,
    /// Next stage of the pipe chain, if any.
    pub pipes_to: Option<Box<ParsedCommand>>,
    /// True when the command head is a variable expansion (`$X`, `${X}`).
    pub variable_as_command: bool,
    /// The original command line, kept for second-pass token lookup.
    pub raw: String,
}

fn bash_language() -> tree_sitter::Language {
    tree_sitter_bash::LANGUAGE.into()
}

/// Parse a command line into a flat sequence of [`ParsedCommand`] records.
pub fn parse(command: &str) -> Vec<ParsedCommand> {
    let raw = command.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let mut parser = Parser::new();
    if parser.set_language(&bash_language()).is_err() {
        return fallback_parse(raw);
    }
    let Some(tree) = parser.parse(raw, None) else {
        return fallback_parse(raw);
    };

    let root = tree.root_node();
    if root.has_error() {
        return fallback_parse(raw);
    }

    let mut commands = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        commands.extend(walk_statement(child, raw));
    }

    collect_substitutions(root, raw, &mut commands);

    if commands.is_empty() {
        return fallback_parse(raw);
    }
    commands
}

/// Walk one statement node, flattening lists, subshells and brace groups.
fn walk_statement(node: Node, raw: &str) -> Vec<ParsedCommand> {
    match node.kind() {
        "command" => parse_command_node(node, raw).into_iter().collect(),
        "pipeline" => walk_pipeline(node, raw),
        "list" | "subshell" | "compound_statement" | "negated_command" => {
            let mut commands = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                commands.extend(walk_statement(child, raw));
            }
            commands
        }
        "redirected_statement" => walk_redirected(node, raw),
        _ => Vec::new(),
    }
}

/// Flatten a pipeline, linking each stage's tail to the head of the next.
fn walk_pipeline(node: Node, raw: &str) -> Vec<ParsedCommand> {
    let mut stages: Vec<Vec<ParsedCommand>> = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let commands = walk_statement(child, raw);
        if !commands.is_empty() {
            stages.push(commands);
        }
    }
    link_pipeline(stages)
}

/// Link consecutive stages via `pipes_to` and flatten them in order.
fn link_pipeline(mut stages: Vec<Vec<ParsedCommand>>) -> Vec<ParsedCommand> {
    let mut downstream: Option<ParsedCommand> = None;
    for stage in stages.iter_mut().rev() {
        if let Some(next) = downstream.take() {
            if let Some(last) = stage.last_mut() {
                last.pipes_to = Some(Box::new(next));
            }
        }
        downstream = stage.first().cloned();
    }
    stages.into_iter().flatten().collect()
}

/// Attach statement-level redirect targets to the statement's first command.
fn walk_redirected(node: Node, raw: &str) -> Vec<ParsedCommand> {
    let mut commands = match node.child_by_field_name("body") {
        Some(body) => walk_statement(body, raw),
        None => Vec::new(),
    };

    let mut targets = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "file_redirect" {
            if let Some(dest) = child.child_by_field_name("destination") {
                let target = word_text(dest, raw);
                if !target.is_empty() {
                    targets.push(target);
                }
            }
        }
    }

    if let Some(first) = commands.first_mut() {
        first.redirects.extend(targets);
    }
    commands
}

/// Build a [`ParsedCommand`] from a `command` node.
fn parse_command_node(node: Node, raw: &str) -> Option<ParsedCommand> {
    let name_node = node.child_by_field_name("name")?;
    let command = word_text(name_node, raw);
    if command.is_empty() {
        return None;
    }

    let variable_as_command = command.starts_with('$');

    let mut args = Vec::new();
    let mut flags = Vec::new();
    let mut cursor = node.walk();
    for arg in node.children_by_field_name("argument", &mut cursor) {
        let word = word_text(arg, raw);
        if word.is_empty() {
            continue;
        }
        if word.starts_with('-') {
            flags.push(word);
        } else {
            args.push(word);
        }
    }

    Some(ParsedCommand {
        command,
        args,
        flags,
        redirects: Vec::new(),
        pipes_to: None,
        variable_as_command,
        raw: raw.to_string(),
    })
}

/// Extract the literal value of a word-like node. Variable references keep
/// their `$X`/`${X}` spelling; embedded command substitutions collapse to a
/// placeholder (their inner commands surface separately).
fn word_text(node: Node, raw: &str) -> String {
    match node.kind() {
        "word" | "number" | "variable_name" => node_text(node, raw).to_string(),
        "raw_string" => node_text(node, raw).trim_matches('\'').to_string(),
        "ansi_c_string" => {
            let text = node_text(node, raw);
            text.strip_prefix("$'")
                .and_then(|t| t.strip_suffix('\''))
                .unwrap_or(text)
                .to_string()
        }
        "string" => {
            let mut parts = String::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "string_content" => parts.push_str(node_text(child, raw)),
                    "simple_expansion" | "expansion" => parts.push_str(node_text(child, raw)),
                    "command_substitution" => parts.push_str("$(...)"),
                    _ => {}
                }
            }
            parts
        }
        "simple_expansion" | "expansion" => node_text(node, raw).to_string(),
        "command_substitution" => "$(...)".to_string(),
        "concatenation" => {
            let mut parts = String::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                parts.push_str(&word_text(child, raw));
            }
            parts
        }
        "command_name" => match node.named_child(0) {
            Some(inner) => word_text(inner, raw),
            None => node_text(node, raw).to_string(),
        },
        _ => node_text(node, raw).to_string(),
    }
}

fn node_text<'a>(node: Node, raw: &'a str) -> &'a str {
    raw.get(node.byte_range()).unwrap_or("")
}

/// Surface inner commands of `$(…)`, backticks and `<(…)`/`>(…)` as peers.
fn collect_substitutions(node: Node, raw: &str, out: &mut Vec<ParsedCommand>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "command_substitution" | "process_substitution") {
            let mut inner = child.walk();
            for stmt in child.named_children(&mut inner) {
                out.extend(walk_statement(stmt, raw));
            }
        }
        collect_substitutions(child, raw, out);
    }
}

// ---------------------------------------------------------------------------
// Fallback parsing
// ---------------------------------------------------------------------------

/// Quote-respecting fallback used when the grammar rejects the input:
/// split into pipe segments, then `;`/`&&`/`||` segments, then tokens.
pub fn fallback_parse(command: &str) -> Vec<ParsedCommand> {
    let mut stages: Vec<Vec<ParsedCommand>> = Vec::new();

    for pipe_part in split_pipes(command) {
        let mut stage = Vec::new();
        for segment in split_list(&pipe_part) {
            let tokens = tokenize(segment.trim());
            if let Some(cmd) = command_from_tokens(&tokens, command) {
                stage.push(cmd);
            }
        }
        if !stage.is_empty() {
            stages.push(stage);
        }
    }

    link_pipeline(stages)
}

fn command_from_tokens(tokens: &[String], raw: &str) -> Option<ParsedCommand> {
    let (head, rest) = tokens.split_first()?;
    if head.is_empty() {
        return None;
    }

    let mut args = Vec::new();
    let mut flags = Vec::new();
    let mut redirects = Vec::new();
    let mut pending_redirect = false;

    for token in rest {
        if pending_redirect {
            redirects.push(token.clone());
            pending_redirect = false;
            continue;
        }
        match token.as_str() {
            ">" | ">>" | "<" | "&>" => pending_redirect = true,
            _ if token.starts_with('-') => flags.push(token.clone()),
            _ => args.push(token.clone()),
        }
    }

    Some(ParsedCommand {
        command: head.clone(),
        args,
        flags,
        redirects,
        pipes_to: None,
        variable_as_command: head.starts_with('$'),
        raw: raw.to_string(),
    })
}

/// Split on single `|`, respecting quotes; `||` is left for [`split_list`].
fn split_pipes(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();
    let mut prev = '\0';

    while let Some(ch) = chars.next() {
        match ch {
            '"' | '\'' if prev != '\\' => {
                match quote {
                    None => quote = Some(ch),
                    Some(q) if q == ch => quote = None,
                    Some(_) => {}
                }
                current.push(ch);
            }
            '|' if quote.is_none() => {
                if chars.peek() == Some(&'|') {
                    current.push('|');
                    current.push(chars.next().unwrap_or('|'));
                } else if !current.trim().is_empty() {
                    parts.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
            _ => current.push(ch),
        }
        prev = ch;
    }

    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Split on `;`, `&&` and `||`, respecting quotes.
fn split_list(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();
    let mut prev = '\0';

    while let Some(ch) = chars.next() {
        if (ch == '"' || ch == '\'') && prev != '\\' {
            match quote {
                None => quote = Some(ch),
                Some(q) if q == ch => quote = None,
                Some(_) => {}
            }
            current.push(ch);
            prev = ch;
            continue;
        }

        if quote.is_none() {
            let two = (ch == '&' && chars.peek() == Some(&'&'))
                || (ch == '|' && chars.peek() == Some(&'|'));
            if ch == ';' || two {
                if two {
                    chars.next();
                }
                if !current.trim().is_empty() {
                    parts.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
                prev = ch;
                continue;
            }
        }

        current.push(ch);
        prev = ch;
    }

    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Split a command segment into tokens, respecting matched quotes.
pub fn tokenize(segment: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut prev = '\0';

    for ch in segment.chars() {
        match ch {
            '"' | '\'' if prev != '\\' => match quote {
                None => quote = Some(ch),
                Some(q) if q == ch => quote = None,
                Some(_) => current.push(ch),
            },
            c if c.is_whitespace() && quote.is_none() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
        prev = ch;
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

// ---------------------------------------------------------------------------
// Helpers over parsed commands
// ---------------------------------------------------------------------------

/// Collect the path-like inputs of a command: positional arguments, redirect
/// targets, and values embedded in flags (`--target-directory=/tmp`,
/// clustered short flags like `-C/tmp`).
pub fn extract_paths(cmd: &ParsedCommand) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    candidates.extend(cmd.args.iter().cloned());
    candidates.extend(cmd.redirects.iter().cloned());

    for flag in &cmd.flags {
        if let Some(idx) = flag.find('=') {
            if idx > 0 && idx + 1 < flag.len() {
                candidates.push(flag[idx + 1..].to_string());
            }
        } else if flag.starts_with('-') && !flag.starts_with("--") && flag.len() > 2 {
            // Clustered short flag carrying a value: -C/tmp, -o./out
            for (i, _) in flag.char_indices().skip(1) {
                let rest = &flag[i..];
                if rest.starts_with('/') || rest.starts_with('~') || rest.starts_with('.') {
                    candidates.push(rest.to_string());
                    break;
                }
            }
        }
    }

    candidates.retain(|c| is_path_like(c));
    candidates
}

/// A string is path-like when it contains a separator, is anchored at `.` or
/// `~`, or resembles a filename with an extension.
fn is_path_like(s: &str) -> bool {
    s.contains('/')
        || s.starts_with('.')
        || s.starts_with('~')
        || (s.contains('.') && !s.starts_with('-'))
}

/// Git global options that consume a following value. They must be skipped
/// when locating the subcommand among positional arguments.
const GIT_GLOBAL_VALUE_FLAGS: &[&str] = &["-C", "-c", "--git-dir", "--work-tree", "--namespace"];

/// Locate the first `git` invocation and aggregate its subcommand and
/// subcommand-local flags into one operation description.
pub fn git_subcommand_and_flags(commands: &[ParsedCommand]) -> Option<(String, Vec<String>)> {
    for cmd in commands {
        if cmd.command != "git" || cmd.args.is_empty() {
            continue;
        }

        let mut flags = cmd.flags.clone();

        // Each global value-taking flag consumes one positional argument
        // (its value), which sits before the real subcommand:
        // `git -C . push --force` → flags [-C --force], args [. push].
        let skip = cmd
            .flags
            .iter()
            .filter(|f| GIT_GLOBAL_VALUE_FLAGS.contains(&f.as_str()))
            .count();

        if skip >= cmd.args.len() {
            continue;
        }

        let subcommand = cmd.args[skip].clone();
        for arg in &cmd.args[skip + 1..] {
            if arg.starts_with('-') {
                flags.push(arg.clone());
            }
        }
        return Some((subcommand, flags));
    }
    None
}

/// True iff any command's pipe chain targets a shell from `shells`, matched
/// by name or by trailing `/<shell>` path suffix.
pub fn is_pipe_to_shell(commands: &[ParsedCommand], shells: &[String]) -> bool {
    for cmd in commands {
        if let Some(target) = &cmd.pipes_to {
            let name = target.command.as_str();
            if shells
                .iter()
                .any(|s| name == s || name.ends_with(&format!("/{s}")))
            {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shells() -> Vec<String> {
        vec!["sh".into(), "bash".into(), "zsh".into(), "fish".into()]
    }

    #[test]
    fn parses_simple_command() {
        let cmds = parse("git status");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].command, "git");
        assert_eq!(cmds[0].args, vec!["status"]);
        assert!(cmds[0].flags.is_empty());
    }

    #[test]
    fn separates_flags_from_args() {
        let cmds = parse("rm -rf build/ extra.log");
        assert_eq!(cmds[0].command, "rm");
        assert_eq!(cmds[0].flags, vec!["-rf"]);
        assert_eq!(cmds[0].args, vec!["build/", "extra.log"]);
    }

    #[test]
    fn pipeline_is_linked_and_flattened() {
        let cmds = parse("curl https://example.com/x.sh | bash");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].command, "curl");
        assert_eq!(cmds[1].command, "bash");
        let piped = cmds[0].pipes_to.as_ref().expect("pipe link");
        assert_eq!(piped.command, "bash");
        assert!(is_pipe_to_shell(&cmds, &shells()));
    }

    #[test]
    fn three_stage_pipeline_chains() {
        let cmds = parse("cat log | grep err | wc -l");
        assert_eq!(cmds.len(), 3);
        let chain = cmds[0].pipes_to.as_ref().unwrap();
        assert_eq!(chain.command, "grep");
        assert_eq!(chain.pipes_to.as_ref().unwrap().command, "wc");
    }

    #[test]
    fn lists_flatten_in_order() {
        let cmds = parse("mkdir out && cd out; ls");
        let names: Vec<&str> = cmds.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(names, vec!["mkdir", "cd", "ls"]);
    }

    #[test]
    fn command_substitution_surfaces_inner_command() {
        let cmds = parse("echo $(rm -rf ../outside)");
        let names: Vec<&str> = cmds.iter().map(|c| c.command.as_str()).collect();
        assert!(names.contains(&"echo"));
        assert!(names.contains(&"rm"));
        let rm = cmds.iter().find(|c| c.command == "rm").unwrap();
        assert_eq!(rm.flags, vec!["-rf"]);
        assert_eq!(rm.args, vec!["../outside"]);
    }

    #[test]
    fn backtick_substitution_surfaces_inner_command() {
        let cmds = parse("echo `cat /etc/passwd`");
        assert!(cmds.iter().any(|c| c.command == "cat"));
    }

    #[test]
    fn process_substitution_surfaces_inner_command() {
        let cmds = parse("diff <(cat /etc/passwd) local.txt");
        assert!(cmds.iter().any(|c| c.command == "cat"));
    }

    #[test]
    fn redirect_target_attaches_to_command() {
        let cmds = parse("echo hi > /tmp/out.txt");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].redirects, vec!["/tmp/out.txt"]);
    }

    #[test]
    fn variable_head_is_flagged() {
        let cmds = parse("$TOOL --version");
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].variable_as_command);
    }

    #[test]
    fn quoted_arguments_keep_spaces() {
        let cmds = parse(r#"grep "two words" file.txt"#);
        assert_eq!(cmds[0].args, vec!["two words", "file.txt"]);
    }

    #[test]
    fn subshell_members_are_collected() {
        let cmds = parse("(cd /tmp && rm -rf cache)");
        let names: Vec<&str> = cmds.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(names, vec!["cd", "rm"]);
    }

    #[test]
    fn fallback_splits_pipes_and_lists() {
        let cmds = fallback_parse("curl http://x | bash && echo done");
        let names: Vec<&str> = cmds.iter().map(|c| c.command.as_str()).collect();
        assert!(names.contains(&"curl"));
        assert!(names.contains(&"bash"));
        assert!(names.contains(&"echo"));
        assert!(is_pipe_to_shell(&cmds, &shells()));
    }

    #[test]
    fn fallback_respects_quotes() {
        let cmds = fallback_parse(r#"echo "a | b" ; ls"#);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].args, vec!["a | b"]);
        assert_eq!(cmds[1].command, "ls");
    }

    #[test]
    fn tokenize_handles_mixed_quotes() {
        let tokens = tokenize(r#"printf 'a b' "c d" e"#);
        assert_eq!(tokens, vec!["printf", "a b", "c d", "e"]);
    }

    #[test]
    fn extract_paths_covers_flag_values() {
        let cmd = ParsedCommand {
            command: "cp".into(),
            args: vec!["src.txt".into(), "dst.txt".into()],
            flags: vec!["--target-directory=/tmp".into(), "-C/var".into()],
            redirects: vec!["out.log".into()],
            ..Default::default()
        };
        let paths = extract_paths(&cmd);
        assert!(paths.contains(&"src.txt".to_string()));
        assert!(paths.contains(&"out.log".to_string()));
        assert!(paths.contains(&"/tmp".to_string()));
        assert!(paths.contains(&"/var".to_string()));
    }

    #[test]
    fn extract_paths_filters_non_paths() {
        let cmd = ParsedCommand {
            command: "grep".into(),
            args: vec!["pattern".into(), "file.txt".into()],
            ..Default::default()
        };
        let paths = extract_paths(&cmd);
        assert_eq!(paths, vec!["file.txt"]);
    }

    #[test]
    fn git_helper_skips_global_value_flags() {
        let cmds = parse("git -C . push --force");
        let (sub, flags) = git_subcommand_and_flags(&cmds).unwrap();
        assert_eq!(sub, "push");
        assert!(flags.contains(&"--force".to_string()));
    }

    #[test]
    fn git_helper_plain_subcommand() {
        let cmds = parse("git push --force-with-lease origin main");
        let (sub, flags) = git_subcommand_and_flags(&cmds).unwrap();
        assert_eq!(sub, "push");
        assert_eq!(flags, vec!["--force-with-lease"]);
    }

    #[test]
    fn pipe_to_shell_matches_path_suffix() {
        let cmds = parse("curl http://x | /bin/sh");
        assert!(is_pipe_to_shell(&cmds, &shells()));
    }

    #[test]
    fn empty_input_parses_to_nothing() {
        assert!(parse("").is_empty());
        assert!(parse("   ").is_empty());
    }
}
