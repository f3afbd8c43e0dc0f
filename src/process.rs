//! Helpers shared by the command-driven collaborators

/// Max number of output lines kept in error messages and diagnostics.
const OUTPUT_TAIL_LINES: usize = 50;

/// Combine stdout and stderr and keep the last `OUTPUT_TAIL_LINES` lines
pub(crate) fn output_tail(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail = if total > OUTPUT_TAIL_LINES {
        &lines[total - OUTPUT_TAIL_LINES..]
    } else {
        &lines[..]
    };
    tail.join("\n")
}

/// Substitute `{name}` placeholders in an argv template
pub(crate) fn render_argv(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let stdout: String = (0..60).map(|i| format!("out {}\n", i)).collect();
        let tail = output_tail(&stdout, "err last");
        let lines: Vec<_> = tail.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "out 11");
        assert_eq!(lines[49], "err last");
    }

    #[test]
    fn tail_short_output_untouched() {
        assert_eq!(output_tail("a\nb", "c"), "a\nb\nc");
    }

    #[test]
    fn render_substitutes_placeholders() {
        let template = vec![
            "fetch".to_string(),
            "--rev={id}".to_string(),
            "{dest}".to_string(),
        ];
        let argv = render_argv(
            &template,
            &[("id", "2023-01-07".to_string()), ("dest", "/tmp/x".to_string())],
        );
        assert_eq!(argv, vec!["fetch", "--rev=2023-01-07", "/tmp/x"]);
    }
}
