//! Compatibility layer for rayon/sequential execution.
//!
//! When the `parallel` feature is enabled, this re-exports rayon's parallel
//! iterators and runs the chunk helpers on the rayon pool. When disabled,
//! the same API runs sequentially on the calling thread.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`.
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;

/// Run `f(chunk_index, chunk)` over disjoint mutable chunks of `data`.
///
/// Chunks have `chunk_len` elements except possibly the last one.
pub fn for_each_chunk_mut<T, F>(data: &mut [T], chunk_len: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    let chunk_len = chunk_len.max(1);
    #[cfg(feature = "parallel")]
    data.par_chunks_mut(chunk_len)
        .enumerate()
        .for_each(|(i, chunk)| f(i, chunk));
    #[cfg(not(feature = "parallel"))]
    data.chunks_mut(chunk_len)
        .enumerate()
        .for_each(|(i, chunk)| f(i, chunk));
}

/// Like [`for_each_chunk_mut`], but each chunk also returns a partial result.
///
/// Partials are combined with `reduce` in chunk order, so floating-point
/// sums do not depend on thread scheduling.
pub fn fold_chunks_mut<T, A, F, R>(data: &mut [T], chunk_len: usize, identity: A, f: F, reduce: R) -> A
where
    T: Send,
    A: Send,
    F: Fn(usize, &mut [T]) -> A + Sync + Send,
    R: Fn(A, A) -> A,
{
    let chunk_len = chunk_len.max(1);
    #[cfg(feature = "parallel")]
    let partials: Vec<A> = data
        .par_chunks_mut(chunk_len)
        .enumerate()
        .map(|(i, chunk)| f(i, chunk))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let partials: Vec<A> = data
        .chunks_mut(chunk_len)
        .enumerate()
        .map(|(i, chunk)| f(i, chunk))
        .collect();
    partials.into_iter().fold(identity, reduce)
}

/// Map every index of `0..count` through `f` and combine the results in
/// index order with `reduce`.
pub fn map_reduce<A, F, R>(count: usize, identity: A, f: F, reduce: R) -> A
where
    A: Send,
    F: Fn(usize) -> A + Sync + Send,
    R: Fn(A, A) -> A,
{
    let partials: Vec<A> = (0..count).into_par_iter().map(f).collect();
    partials.into_iter().fold(identity, reduce)
}
