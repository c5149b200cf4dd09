use s0_core::{ComponentMatch, OutputFormat, S0Error};

/// Opening marker of the generated code section.
pub const COMPONENT_START: &str = "<COMPONENT>";
/// Closing marker of the generated code section.
pub const COMPONENT_END: &str = "</COMPONENT>";
/// Opening marker of the explanation section.
pub const EXPLANATION_START: &str = "<EXPLANATION>";
/// Closing marker of the explanation section.
pub const EXPLANATION_END: &str = "</EXPLANATION>";

/// Reference examples shown to the model when not configured otherwise.
pub const DEFAULT_PROMPT_EXAMPLES: usize = 4;

const SYSTEM_PROMPT: &str = "You are an expert UI component developer specializing in React, TypeScript, and modern web development.";

const JSX_JS_SKELETON: &str = "\
const Component = ({ props }) => {
  return (
    <div className=\"component\">
      {/* Component content */}
    </div>
  );
};
export default Component;";

const JSX_TS_SKELETON: &str = "\
interface ComponentProps {
  // Define props here
}

const Component: React.FC<ComponentProps> = ({ props }) => {
  return (
    <div className=\"component\">
      {/* Component content */}
    </div>
  );
};
export default Component;";

/// Build the system message for component generation.
///
/// # Examples
///
/// ```
/// use s0_forge::prompt::build_system_prompt;
///
/// assert!(build_system_prompt().contains("UI component developer"));
/// ```
pub fn build_system_prompt() -> String {
    SYSTEM_PROMPT.to_string()
}

/// The fixed instruction clause describing the code shape for `format`.
///
/// # Examples
///
/// ```
/// use s0_core::OutputFormat;
/// use s0_forge::prompt::format_instructions;
///
/// assert!(format_instructions(OutputFormat::Html).contains("semantic HTML5"));
/// assert!(format_instructions(OutputFormat::JsxTs).contains("interface ComponentProps"));
/// ```
pub fn format_instructions(format: OutputFormat) -> String {
    match format {
        OutputFormat::Html => "Create a semantic HTML5 component with CSS classes".to_string(),
        OutputFormat::JsxJs => format!(
            "Create a React functional component using JavaScript, shaped like:\n```jsx\n{JSX_JS_SKELETON}\n```"
        ),
        OutputFormat::JsxTs => format!(
            "Create a React functional component using TypeScript, shaped like:\n```tsx\n{JSX_TS_SKELETON}\n```"
        ),
    }
}

/// Build the generation prompt from the query, format and retrieved matches.
///
/// Only the first `max_examples` matches are rendered, each as its title and
/// fenced code. The prompt ends with the marker protocol that
/// [`parse_generation`] expects.
///
/// # Examples
///
/// ```
/// use s0_core::OutputFormat;
/// use s0_forge::prompt::build_prompt;
///
/// let prompt = build_prompt("dark mode toggle", &[], OutputFormat::Html, 4);
/// assert!(prompt.starts_with("Create a html component for: dark mode toggle"));
/// assert!(prompt.contains("<COMPONENT>"));
/// assert!(prompt.contains("<EXPLANATION>"));
/// ```
pub fn build_prompt(
    query: &str,
    matches: &[ComponentMatch],
    format: OutputFormat,
    max_examples: usize,
) -> String {
    let examples = matches
        .iter()
        .take(max_examples)
        .enumerate()
        .map(|(i, m)| format!("Example {} ({}):\n```\n{}\n```", i + 1, m.title, m.code_snippet))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Create a {format} component for: {query}

Reference components:
{examples}

Requirements:
- Format: {instructions}
- Make it accessible (ARIA)
- Make it responsive
- Add clear comments
- Follow best practices

Return in this format:
{COMPONENT_START}
[Your code here]
{COMPONENT_END}

{EXPLANATION_START}
[Brief explanation]
{EXPLANATION_END}
",
        instructions = format_instructions(format),
    )
}

/// Code and explanation extracted from a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedComponent {
    /// Trimmed text between the component markers.
    pub code: String,
    /// Trimmed text between the explanation markers.
    pub explanation: String,
}

/// Extract the first marker-delimited code and explanation sections.
///
/// Each section is the shortest span between its start marker and the next
/// end marker, trimmed of surrounding whitespace. Sections may span lines
/// and may be empty.
///
/// # Errors
///
/// Returns [`S0Error::Parse`] if either section is missing.
///
/// # Examples
///
/// ```
/// use s0_forge::prompt::parse_generation;
///
/// let text = "<COMPONENT>\n<button>Go</button>\n</COMPONENT>\n<EXPLANATION> A button. </EXPLANATION>";
/// let generated = parse_generation(text).unwrap();
/// assert_eq!(generated.code, "<button>Go</button>");
/// assert_eq!(generated.explanation, "A button.");
/// ```
pub fn parse_generation(text: &str) -> Result<GeneratedComponent, S0Error> {
    let code = extract_section(text, COMPONENT_START, COMPONENT_END)
        .ok_or_else(|| S0Error::Parse(format!("no {COMPONENT_START} section in completion")))?;
    let explanation = extract_section(text, EXPLANATION_START, EXPLANATION_END).ok_or_else(|| {
        S0Error::Parse(format!("no {EXPLANATION_START} section in completion"))
    })?;
    Ok(GeneratedComponent {
        code: code.to_string(),
        explanation: explanation.to_string(),
    })
}

fn extract_section<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let begin = text.find(start)? + start.len();
    let len = text[begin..].find(end)?;
    Some(text[begin..begin + len].trim())
}

#[cfg(test)]
mod tests {
    use s0_core::EmbeddingSpace;

    use super::*;

    fn sample(id: &str, code: &str) -> ComponentMatch {
        ComponentMatch {
            id: id.into(),
            title: format!("{id} title"),
            summary: String::new(),
            code_snippet: code.into(),
            similarity_score: 0.9,
            space: EmbeddingSpace::Code,
        }
    }

    #[test]
    fn prompt_caps_examples() {
        let matches: Vec<_> = (1..=6)
            .map(|i| sample(&format!("c{i}"), &format!("<div>{i}</div>")))
            .collect();
        let prompt = build_prompt("card grid", &matches, OutputFormat::Html, 4);

        assert!(prompt.contains("Example 1 (c1 title):\n```\n<div>1</div>\n```"));
        assert!(prompt.contains("Example 4 (c4 title)"));
        assert!(!prompt.contains("Example 5"));
        assert!(!prompt.contains("<div>5</div>"));
    }

    #[test]
    fn prompt_with_fewer_matches_renders_all() {
        let matches = vec![sample("a", "<a/>"), sample("b", "<b/>")];
        let prompt = build_prompt("links", &matches, OutputFormat::JsxJs, 4);
        assert!(prompt.contains("Example 2 (b title)"));
        assert!(!prompt.contains("Example 3"));
    }

    #[test]
    fn prompt_includes_requirements_and_format() {
        let prompt = build_prompt("stepper", &[], OutputFormat::JsxTs, 4);
        assert!(prompt.contains("Create a jsx-ts component for: stepper"));
        assert!(prompt.contains("using TypeScript"));
        assert!(prompt.contains("React.FC<ComponentProps>"));
        assert!(prompt.contains("Make it accessible (ARIA)"));
        assert!(prompt.contains("Make it responsive"));
        assert!(prompt.contains("Add clear comments"));
        assert!(prompt.contains("Follow best practices"));
    }

    #[test]
    fn each_format_has_distinct_instructions() {
        let html = format_instructions(OutputFormat::Html);
        let js = format_instructions(OutputFormat::JsxJs);
        let ts = format_instructions(OutputFormat::JsxTs);
        assert!(!html.contains("React"));
        assert!(js.contains("JavaScript") && js.contains("export default Component"));
        assert!(ts.contains("TypeScript") && !js.contains("interface"));
    }

    #[test]
    fn parse_multiline_sections() {
        let text = "Thinking...\n<COMPONENT>\nconst A = () => (\n  <div />\n);\n</COMPONENT>\n\n<EXPLANATION>\nLine one.\nLine two.\n</EXPLANATION>\ntrailing";
        let generated = parse_generation(text).unwrap();
        assert_eq!(generated.code, "const A = () => (\n  <div />\n);");
        assert_eq!(generated.explanation, "Line one.\nLine two.");
    }

    #[test]
    fn parse_uses_first_occurrence_non_greedy() {
        let text = "<COMPONENT>one</COMPONENT><COMPONENT>two</COMPONENT><EXPLANATION>e</EXPLANATION>";
        let generated = parse_generation(text).unwrap();
        assert_eq!(generated.code, "one");
    }

    #[test]
    fn parse_accepts_empty_sections() {
        let generated = parse_generation("<COMPONENT></COMPONENT><EXPLANATION>  </EXPLANATION>").unwrap();
        assert_eq!(generated.code, "");
        assert_eq!(generated.explanation, "");
    }

    #[test]
    fn parse_requires_both_sections() {
        let err = parse_generation("<COMPONENT>x</COMPONENT>").unwrap_err();
        assert!(matches!(err, S0Error::Parse(_)));

        let err = parse_generation("<EXPLANATION>x</EXPLANATION>").unwrap_err();
        assert!(matches!(err, S0Error::Parse(_)));

        assert!(parse_generation("").is_err());
        assert!(parse_generation("<COMPONENT>unterminated<EXPLANATION>e</EXPLANATION>").is_err());
    }

    #[test]
    fn sections_may_appear_in_either_order() {
        let text = "<EXPLANATION>why</EXPLANATION>\n<COMPONENT>code</COMPONENT>";
        let generated = parse_generation(text).unwrap();
        assert_eq!(generated.code, "code");
        assert_eq!(generated.explanation, "why");
    }
}
