/// Split raw user input into prompts: one per line, trimmed, blank lines
/// dropped, order kept.
pub fn parse_prompts(input: &str) -> Vec<String> {
    input
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_blank_lines_and_trims() {
        assert_eq!(
            parse_prompts("draw a cat\n\ndraw a dog\n  "),
            vec!["draw a cat".to_string(), "draw a dog".to_string()]
        );
    }

    #[test]
    fn handles_crlf_and_whitespace_only() {
        assert_eq!(parse_prompts("  one \r\ntwo\r\n"), vec!["one", "two"]);
        assert!(parse_prompts(" \n\t\n").is_empty());
        assert!(parse_prompts("").is_empty());
    }
}
