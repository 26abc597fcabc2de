use async_trait::async_trait;

use crate::error::DataSourceError;
use crate::spec::DataSpec;

/// A sequential, pull-based byte source.
///
/// `open` positions the source and reports the number of bytes it will
/// produce when known; `read` fills as much of `buf` as is ready and returns
/// `Ok(0)` only at end of stream. A closed source may be opened again.
#[async_trait]
pub trait DataSource: Send {
    async fn open(&mut self, spec: DataSpec) -> Result<Option<u64>, DataSourceError>;

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataSourceError>;

    async fn close(&mut self) -> Result<(), DataSourceError>;

    /// URL of the currently open resource.
    fn url(&self) -> Option<&str>;
}

#[async_trait]
impl<S: DataSource + ?Sized> DataSource for Box<S> {
    async fn open(&mut self, spec: DataSpec) -> Result<Option<u64>, DataSourceError> {
        (**self).open(spec).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        (**self).read(buf).await
    }

    async fn close(&mut self) -> Result<(), DataSourceError> {
        (**self).close().await
    }

    fn url(&self) -> Option<&str> {
        (**self).url()
    }
}

/// Bytes of a `len`-byte buffer a read may fill when `remaining` bytes are left.
/// Counts beyond the address space saturate instead of wrapping.
pub(crate) fn read_cap(len: usize, remaining: Option<u64>) -> usize {
    remaining.map_or(len, |r| len.min(usize::try_from(r).unwrap_or(usize::MAX)))
}

/// Drain an opened source into `out`, returning the number of bytes copied.
pub async fn read_to_end<S: DataSource + ?Sized>(
    source: &mut S,
    out: &mut Vec<u8>,
) -> Result<u64, DataSourceError> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        out.extend_from_slice(&buf[..n]);
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_cap() {
        assert_eq!(read_cap(4096, None), 4096);
        assert_eq!(read_cap(4096, Some(10)), 10);
        assert_eq!(read_cap(4096, Some(0)), 0);
        // Lengths past 4 GiB must not wrap on narrow targets.
        assert_eq!(read_cap(4096, Some((1u64 << 32) + 7)), 4096);
        assert_eq!(read_cap(4096, Some(u64::MAX)), 4096);
    }
}
