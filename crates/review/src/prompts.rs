use reviewbot_core::models::ReviewType;

const BASE_PROMPT: &str = "You are an expert code reviewer. Provide a thorough, actionable review. \
Use markdown formatting with headers, bullet points, and code blocks. Be specific, reference line \
numbers and variable names. Keep the tone professional and constructive.";

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a code review synthesizer. Combine multiple \
partial code reviews into one coherent, deduplicated review. Remove duplicates, organize findings \
by severity, and produce a final actionable review.";

pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "typescript",
    "javascript",
    "python",
    "java",
    "go",
    "rust",
    "c",
    "cpp",
    "csharp",
    "php",
    "ruby",
    "swift",
    "kotlin",
    "sql",
    "html",
    "css",
    "bash",
    "yaml",
    "json",
];

pub fn is_supported_language(language: &str) -> bool { SUPPORTED_LANGUAGES.contains(&language) }

fn focus(review_type: ReviewType) -> &'static str {
    match review_type {
        ReviewType::General => {
            "Focus on:
- Code quality and readability
- Design patterns and architecture
- Error handling and edge cases
- Naming conventions and code style
- Potential improvements and refactoring suggestions"
        }
        ReviewType::Security => {
            "Focus exclusively on security concerns:
- Injection vulnerabilities (SQL, XSS, command injection)
- Authentication and authorization flaws
- Data exposure and sensitive information handling
- Input validation and sanitization
- Cryptographic issues
- OWASP Top 10 vulnerabilities"
        }
        ReviewType::Performance => {
            "Focus exclusively on performance:
- Time and space complexity analysis
- Unnecessary computations or re-renders
- Memory leaks and resource management
- Caching opportunities
- Database query optimization
- Bundle size and lazy loading"
        }
        ReviewType::Bugs => {
            "Focus exclusively on finding bugs:
- Logic errors and off-by-one mistakes
- Null/undefined handling issues
- Race conditions and async problems
- Type mismatches and coercion issues
- Incorrect API usage
- Missing error handling for edge cases"
        }
    }
}

pub fn system_prompt(review_type: ReviewType) -> String {
    format!("{BASE_PROMPT}\n\n## {}\n\n{}", review_type.label(), focus(review_type))
}

/// User prompt for chunk `index` (zero-based) of `total`.
pub fn chunk_prompt(chunk: &str, index: usize, total: usize) -> String {
    if total > 1 {
        format!("Review this code diff (part {} of {}):\n{}", index + 1, total, chunk)
    } else {
        format!("Review this code diff:\n{chunk}")
    }
}

pub fn synthesis_prompt(reviews: &[String]) -> String {
    let parts = reviews
        .iter()
        .enumerate()
        .map(|(i, review)| format!("## Part {}\n{}", i + 1, review))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Combine these {} partial reviews into one final review:\n\n{}", reviews.len(), parts)
}

pub fn snippet_prompt(code: &str, language: &str) -> String {
    format!("Review this {language} code:\n```{language}\n{code}\n```")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use reviewbot_core::models::ReviewType;

    use super::*;

    #[test]
    fn test_system_prompts() {
        let general = system_prompt(ReviewType::General);
        assert!(general.contains("expert code reviewer"));
        assert!(general.contains("## General Code Review"));
        assert!(general.contains("Code quality"));

        let security = system_prompt(ReviewType::Security);
        assert!(security.contains("security"));
        assert!(security.contains("Injection"));
        assert!(security.contains("OWASP"));

        let performance = system_prompt(ReviewType::Performance);
        assert!(performance.contains("performance"));
        assert!(performance.contains("complexity"));

        let bugs = system_prompt(ReviewType::Bugs);
        assert!(bugs.contains("bugs"));
        assert!(bugs.contains("Logic errors"));
    }

    #[test]
    fn test_supported_languages() {
        for language in ["typescript", "javascript", "python", "go", "rust"] {
            assert!(is_supported_language(language), "{language}");
        }
        assert!(!is_supported_language("cobol"));
        assert!(!is_supported_language("Rust"));
        let unique = SUPPORTED_LANGUAGES.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), SUPPORTED_LANGUAGES.len());
    }

    #[test]
    fn test_chunk_prompts() {
        assert_eq!(chunk_prompt("diff", 0, 1), "Review this code diff:\ndiff");
        assert_eq!(chunk_prompt("diff", 1, 3), "Review this code diff (part 2 of 3):\ndiff");
    }

    #[test]
    fn test_synthesis_prompt() {
        let prompt = synthesis_prompt(&["first".to_string(), "second".to_string()]);
        assert_eq!(
            prompt,
            "Combine these 2 partial reviews into one final review:\n\n\
             ## Part 1\nfirst\n\n## Part 2\nsecond"
        );
    }

    #[test]
    fn test_snippet_prompt() {
        assert_eq!(
            snippet_prompt("fn main() {}", "rust"),
            "Review this rust code:\n```rust\nfn main() {}\n```"
        );
    }
}
