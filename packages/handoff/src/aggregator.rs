use std::future::poll_fn;
use std::task::Poll;

use crate::error::{Failure, Fault, SourceError};
use crate::generator::Generator;
use crate::slot::Slot;
use crate::task::Bind;

/// Merges many generators into one, yielding `(source index, value)` pairs
/// as values become available.
///
/// The merge is itself a generator: every source is charged once up front,
/// whichever step resolves first is harvested and yielded, and the harvested
/// source is re-charged on the next resume - forwarding the argument the
/// consumer passed, for sources that take one. A source that ends is
/// retired; a source that fails contributes a single failed step wrapping
/// its fault in a [`SourceError`] and is then retired. The merge ends when
/// every source has been retired.
///
/// ```rust
/// use handoff::{Generator, aggregate};
///
/// fn counter(start: u32, count: usize) -> Generator<u32> {
///     Generator::new(move |y| async move {
///         for n in 0..count as u32 {
///             y.emit(start + n).await;
///         }
///     })
/// }
///
/// let merged = aggregate(vec![counter(10, 2), counter(20, 2)]);
/// let mut values: Vec<(usize, u32)> = merged.iter().collect();
/// values.sort_unstable();
/// assert_eq!(values, [(0, 10), (0, 11), (1, 20), (1, 21)]);
/// ```
pub fn aggregate<T, P>(sources: Vec<Generator<T, P>>) -> Generator<(usize, T), P>
where
    T: 'static,
    P: 'static,
{
    Generator::new(move |y| async move {
        let mut sources = sources;
        let mut steps: Vec<Slot<T>> = sources.iter_mut().map(Generator::resume).collect();
        let mut live: Vec<bool> = vec![true; sources.len()];
        let mut remaining = sources.len();

        while remaining > 0 {
            // Wait for any live step to resolve. Steps completing together
            // are picked up in index order across consecutive resumes.
            let index = poll_fn(|cx| {
                for (index, step) in steps.iter_mut().enumerate() {
                    if live[index] && step.poll_drive(cx, Bind::Bound).is_ready() {
                        return Poll::Ready(index);
                    }
                }
                Poll::Pending
            })
            .await;

            match steps[index].take() {
                Ok(value) => {
                    let argument = y.emit((index, value)).await;
                    steps[index] = match argument {
                        Some(argument) => sources[index].resume_with(argument),
                        None => sources[index].resume(),
                    };
                }
                Err(Failure::Canceled) => {
                    // The source ran out of values.
                    live[index] = false;
                    remaining -= 1;
                }
                Err(Failure::Faulted(fault)) => {
                    live[index] = false;
                    remaining -= 1;
                    let _ = y.raise(Fault::new(SourceError::new(index, fault))).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use crate::error::Failure;

    use super::*;

    fn counter(start: u32, count: usize) -> Generator<u32> {
        Generator::new(move |y| async move {
            for n in 0..count as u32 {
                y.emit(start + n).await;
            }
        })
    }

    #[test]
    fn every_source_value_arrives_tagged_with_its_index() {
        let merged = aggregate(vec![counter(100, 3), counter(200, 2), counter(300, 1)]);
        let mut values: Vec<(usize, u32)> = merged.iter().collect();
        values.sort_unstable();
        assert_eq!(
            values,
            [(0, 100), (0, 101), (0, 102), (1, 200), (1, 201), (2, 300)]
        );
    }

    #[test]
    fn an_empty_set_ends_immediately() {
        block_on(async {
            let mut merged = aggregate(Vec::<Generator<u32>>::new());
            assert!(matches!(merged.resume().await, Err(Failure::Canceled)));
        });
    }

    #[test]
    fn a_failing_source_is_reported_once_and_retired() {
        block_on(async {
            let flaky = Generator::<u32>::new(|y| async move {
                y.emit(1).await;
                y.raise(Fault::msg("broken")).await;
            });
            let mut merged = aggregate(vec![flaky, counter(50, 1)]);

            let mut values = Vec::new();
            let mut failures = Vec::new();
            loop {
                match merged.resume().await {
                    Ok(pair) => values.push(pair),
                    Err(Failure::Canceled) => break,
                    Err(Failure::Faulted(fault)) => {
                        let wrapped = fault
                            .downcast_ref::<SourceError>()
                            .expect("aggregator failures carry the source index");
                        failures.push((wrapped.index(), wrapped.cause().to_string()));
                    }
                }
            }

            values.sort_unstable();
            assert_eq!(values, [(0, 1), (1, 50)]);
            assert_eq!(failures, [(0, "broken".to_string())]);
        });
    }

    #[test]
    fn consumer_arguments_reach_the_harvested_source() {
        block_on(async {
            let echo = Generator::<u32, u32>::new(|y| async move {
                let mut value = 0;
                loop {
                    match y.emit(value).await {
                        Some(next) => value = next,
                        None => break,
                    }
                }
            });
            let mut merged = aggregate(vec![echo]);

            let (index, value) = merged.resume().await.unwrap();
            assert_eq!((index, value), (0, 0));
            // The argument of this resume re-charges source 0.
            let (_, value) = merged.resume_with(42).await.unwrap();
            assert_eq!(value, 42);
            // A resume without an argument ends the echo source.
            assert!(matches!(merged.resume().await, Err(Failure::Canceled)));
        });
    }
}
