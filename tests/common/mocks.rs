//! Output sinks that fail on demand.
use mockall::mock;

use std::io::{self, ErrorKind, Write};

mock! {
    pub File {}
    impl Write for File {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
        fn flush(&mut self) -> io::Result<()>;
    }
}

/// A file whose every write is refused, as on a read-only or full disk.
pub fn read_only_file() -> MockFile {
    let mut file = MockFile::default();
    file.expect_write()
        .returning(|_buf| Err(io::Error::from(ErrorKind::PermissionDenied)));
    file.expect_flush().returning(|| Ok(()));
    file
}
