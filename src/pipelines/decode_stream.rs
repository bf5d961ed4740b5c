use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::generation::TokenId;

pin_project! {
    /// Best sequence after every decode step.
    pub struct DecodeStream<S> {
        #[pin]
        inner: Pin<Box<S>>,
    }
}

impl<S> DecodeStream<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }

    /// Get the best sequence after the next step.
    ///
    /// Returns `None` once decoding has finished.
    pub async fn next(&mut self) -> Option<anyhow::Result<Vec<TokenId>>>
    where
        S: Stream<Item = anyhow::Result<Vec<TokenId>>>,
    {
        use futures::StreamExt;
        self.inner.as_mut().next().await
    }

    /// Drain the stream and return the final best sequence.
    ///
    /// Returns an empty sequence if no step ran.
    pub async fn last(mut self) -> anyhow::Result<Vec<TokenId>>
    where
        S: Stream<Item = anyhow::Result<Vec<TokenId>>>,
    {
        use futures::StreamExt;
        let mut best = Vec::new();
        while let Some(sequence) = self.inner.as_mut().next().await {
            best = sequence?;
        }
        Ok(best)
    }

    /// Take the best sequences of up to `n` steps.
    ///
    /// If decoding finishes before `n` steps, the returned vector will contain
    /// fewer elements.
    pub async fn take(mut self, n: usize) -> anyhow::Result<Vec<Vec<TokenId>>>
    where
        S: Stream<Item = anyhow::Result<Vec<TokenId>>>,
    {
        use futures::StreamExt;
        let mut out = Vec::new();
        for _ in 0..n {
            match self.inner.as_mut().next().await {
                Some(sequence) => out.push(sequence?),
                None => break,
            }
        }
        Ok(out)
    }
}

impl<S> Stream for DecodeStream<S>
where
    S: Stream<Item = anyhow::Result<Vec<TokenId>>>,
{
    type Item = anyhow::Result<Vec<TokenId>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        this.inner.as_mut().as_mut().poll_next(cx)
    }
}
