use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use windfall_common::text::truncate_utf8;

/// One page's cleaned content, ready for prompt assembly.
#[derive(Debug, Clone)]
pub struct CleanedPage {
    pub url: String,
    pub content: String,
}

/// Pages whose cleaned content falls below this are empty shells or junk
/// and are not worth an oracle call.
pub const MIN_CONTENT_BYTES: usize = 500;

/// Strip scripts, styles, and page chrome from captured HTML and cap the
/// result at `max_bytes`. Cleaning failures fall back to capped raw HTML
/// rather than losing the page.
pub fn clean_page(url: &str, html: &str, max_bytes: usize) -> String {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    let text = transform_content_input(input, &config);

    if text.trim().is_empty() {
        // Readability rejects some sparse layouts outright
        return truncate_utf8(html, max_bytes).to_string();
    }
    truncate_utf8(&text, max_bytes).to_string()
}
