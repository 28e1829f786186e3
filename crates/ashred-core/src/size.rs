//! Target length resolution.
//!
//! Regular files report their length through `fstat`. For device special
//! files that length is meaningless, so the media size is asked of the
//! device driver instead.

use crate::error::{Result, ShredError};
use std::fs::File;
use std::os::unix::fs::FileTypeExt;

/// Determine the logical length of an open target in bytes.
///
/// # Errors
///
/// Returns [`ShredError::Resolution`] if either the metadata query or the
/// device media-size query fails.
pub fn resolve_size(file: &File) -> Result<u64> {
    let metadata = file.metadata().map_err(ShredError::Resolution)?;
    let file_type = metadata.file_type();

    if file_type.is_block_device() || file_type.is_char_device() {
        let size = device::media_size(file).map_err(ShredError::Resolution)?;
        tracing::debug!(size, "resolved device media size");
        return Ok(size);
    }

    Ok(metadata.len())
}

#[cfg(target_os = "linux")]
mod device {
    use std::fs::File;
    use std::io;
    use std::os::fd::AsRawFd;

    nix::ioctl_read!(blk_getsize64, 0x12, 114, u64);

    pub(super) fn media_size(file: &File) -> io::Result<u64> {
        let mut size: u64 = 0;
        // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer, which
        // refers to a live local for the duration of the call.
        unsafe { blk_getsize64(file.as_raw_fd(), &mut size) }?;
        Ok(size)
    }
}

#[cfg(target_os = "freebsd")]
mod device {
    use std::fs::File;
    use std::io;
    use std::os::fd::AsRawFd;

    nix::ioctl_read!(diocgmediasize, b'd', 129, libc::off_t);

    pub(super) fn media_size(file: &File) -> io::Result<u64> {
        let mut size: libc::off_t = 0;
        // SAFETY: DIOCGMEDIASIZE writes a single off_t through the pointer,
        // which refers to a live local for the duration of the call.
        unsafe { diocgmediasize(file.as_raw_fd(), &mut size) }?;
        u64::try_from(size).map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
mod device {
    use std::fs::File;
    use std::io::{self, Seek, SeekFrom};

    pub(super) fn media_size(file: &File) -> io::Result<u64> {
        let mut file = file;
        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_regular_file_size() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&[0u8; 12345]).unwrap();
        temp.flush().unwrap();

        assert_eq!(resolve_size(temp.as_file()).unwrap(), 12345);
    }

    #[test]
    fn test_empty_file_size() {
        let temp = NamedTempFile::new().unwrap();
        assert_eq!(resolve_size(temp.as_file()).unwrap(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_char_device_without_media_size() {
        // /dev/null is a character device that does not answer BLKGETSIZE64
        let file = File::open("/dev/null").unwrap();
        assert!(matches!(
            resolve_size(&file),
            Err(ShredError::Resolution(_))
        ));
    }
}
