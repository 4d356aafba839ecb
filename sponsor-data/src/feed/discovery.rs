//! Locating the current register CSV on the publication page.
//!
//! The publisher replaces the CSV under a new asset URL on every update, so
//! the download link has to be scraped from the landing page.

use std::sync::LazyLock;

use regex::Regex;

/// Landing page that links to the latest register CSV.
pub const PUBLICATION_PAGE_URL: &str =
    "https://www.gov.uk/government/publications/register-of-licensed-sponsors-workers";

#[expect(
    clippy::expect_used,
    reason = "the pattern is a literal and is covered by unit tests"
)]
static CSV_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://assets\.publishing\.service\.gov\.uk/[^"]+\.csv"#)
        .expect("CSV link pattern compiles")
});

/// Return the first register CSV link found in `html`.
///
/// # Examples
/// ```
/// use sponsor_data::feed::extract_csv_url;
///
/// let html = r#"<a href="https://assets.publishing.service.gov.uk/media/abc/register.csv">CSV</a>"#;
/// assert_eq!(
///     extract_csv_url(html),
///     Some("https://assets.publishing.service.gov.uk/media/abc/register.csv")
/// );
/// assert_eq!(extract_csv_url("<p>no link</p>"), None);
/// ```
#[must_use]
pub fn extract_csv_url(html: &str) -> Option<&str> {
    CSV_LINK.find(html).map(|found| found.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn picks_the_first_asset_link() {
        let html = r#"
            <a href="https://www.gov.uk/other.csv">elsewhere</a>
            <a href="https://assets.publishing.service.gov.uk/media/one/2026-10-16_-_Worker_and_Temporary_Worker.csv">latest</a>
            <a href="https://assets.publishing.service.gov.uk/media/two/older.csv">older</a>
        "#;

        assert_eq!(
            extract_csv_url(html),
            Some(
                "https://assets.publishing.service.gov.uk/media/one/2026-10-16_-_Worker_and_Temporary_Worker.csv"
            )
        );
    }

    #[rstest]
    #[case(r#"<a href="https://assets.publishing.service.gov.uk/media/one/register.pdf">pdf</a>"#)]
    #[case(r#"<a href="http://assets.publishing.service.gov.uk/media/one/register.csv">http</a>"#)]
    #[case("")]
    fn ignores_non_matching_links(#[case] html: &str) {
        assert_eq!(extract_csv_url(html), None);
    }
}
