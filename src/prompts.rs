//! Prompts for page-layout analysis.
//!
//! Every prompt lives here so the wording can be changed, and inspected by
//! tests, without touching the pipeline. The page number and page count are
//! part of the prompt on purpose: models describe a cover page, a body page
//! and a back page differently when they know where in the document they are.

/// Built-in layout prompt. `{page}` and `{total}` are substituted per page.
pub const DEFAULT_LAYOUT_PROMPT: &str = "Describe the layout of this PDF page (page {page} of {total}). Include:
- Text layout (columns, headers, paragraphs, lists)
- Visual elements (images, charts, tables, diagrams)
- Formatting details (fonts, colors, spacing if notable)
- Overall organization of the page

Be concise but thorough. Focus on layout structure rather than content.";

/// Build the built-in layout prompt for a 1-based `page` of `total`.
pub fn page_layout_prompt(page: usize, total: usize) -> String {
    render_prompt_template(DEFAULT_LAYOUT_PROMPT, page, total)
}

/// Substitute `{page}` and `{total}` in a caller-supplied template.
pub fn render_prompt_template(template: &str, page: usize, total: usize) -> String {
    template
        .replace("{page}", &page.to_string())
        .replace("{total}", &total.to_string())
}
