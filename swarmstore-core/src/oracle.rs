/// Source of the swarm's total declared content length, normally the
/// integrity layer that owns the hash tree. Only consulted to tell a short
/// read at the true end of content from one that should continue into the
/// next file.
pub trait ContentSize: Send {
    /// `None` while the size is not known yet.
    fn content_size(&self) -> Option<u64>;
}

/// Oracle with nothing to say; the store falls back to the manifest's total.
pub struct UnknownSize;

impl ContentSize for UnknownSize {
    fn content_size(&self) -> Option<u64> {
        None
    }
}

/// A size fixed up front.
#[derive(Clone, Copy, Debug)]
pub struct FixedSize(pub u64);

impl ContentSize for FixedSize {
    fn content_size(&self) -> Option<u64> {
        Some(self.0)
    }
}

impl<F> ContentSize for F
where
    F: Fn() -> Option<u64> + Send,
{
    fn content_size(&self) -> Option<u64> {
        self()
    }
}
