use futures_util::{Stream, StreamExt};

use crate::error::Result;

/// Fold a stream of text fragments into one string.
///
/// After every non-empty fragment `on_update` receives the whole text so far,
/// so callers only ever replace what they display. The first error stops the
/// fold and is returned; text accumulated up to that point is dropped here
/// and it is up to the caller what to do with what it already displayed.
pub async fn accumulate<S, F>(fragments: S, mut on_update: F) -> Result<String>
where
    S: Stream<Item = Result<String>>,
    F: FnMut(&str),
{
    let mut fragments = std::pin::pin!(fragments);
    let mut accumulated = String::new();

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        if fragment.is_empty() {
            continue;
        }
        accumulated.push_str(&fragment);
        on_update(&accumulated);
    }

    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use futures_util::stream;

    fn ok(text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    #[tokio::test]
    async fn test_final_text_is_concatenation_in_order() {
        let fragments = vec![ok("The "), ok("quick "), ok("brown "), ok("fox")];
        let mut seen = Vec::new();

        let text = accumulate(stream::iter(fragments), |so_far| seen.push(so_far.to_string()))
            .await
            .unwrap();

        assert_eq!(text, "The quick brown fox");
        assert_eq!(seen, vec!["The ", "The quick ", "The quick brown ", "The quick brown fox"]);
    }

    #[tokio::test]
    async fn test_empty_fragments_produce_no_callback() {
        let mut calls = 0;
        let text = accumulate(stream::iter(vec![ok(""), ok("a"), ok("")]), |_| calls += 1)
            .await
            .unwrap();
        assert_eq!(text, "a");
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let text = accumulate(stream::iter(Vec::<Result<String>>::new()), |_| {})
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_error_stops_callbacks() {
        let fragments = vec![
            ok("Hel"),
            Err(Error::Api { status: 500, body: "boom".to_string() }),
            ok("lo"),
        ];
        let mut seen = Vec::new();

        let result = accumulate(stream::iter(fragments), |so_far| seen.push(so_far.to_string())).await;

        assert!(matches!(result, Err(Error::Api { status: 500, .. })));
        assert_eq!(seen, vec!["Hel"]);
    }
}
