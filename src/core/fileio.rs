// Positional read/write, size and truncate helpers over a shared `File`.
// Callers hold the advisory lock; nothing here seeks, so one descriptor can be shared.
use std::fs::File;
use std::io;

#[cfg(unix)]
use std::os::unix::fs::FileExt as PositionalExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt as PositionalExt;

pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    loop {
        #[cfg(unix)]
        let result = PositionalExt::read_at(file, buf, offset);
        #[cfg(windows)]
        let result = PositionalExt::seek_read(file, buf, offset);
        match result {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

pub(crate) fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    loop {
        #[cfg(unix)]
        let result = PositionalExt::write_at(file, buf, offset);
        #[cfg(windows)]
        let result = PositionalExt::seek_write(file, buf, offset);
        match result {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

pub(crate) fn len(file: &File) -> io::Result<u64> {
    file.metadata().map(|meta| meta.len())
}

pub(crate) fn truncate(file: &File) -> io::Result<()> {
    file.set_len(0)
}
