//! Moving bytes between the buffers and `std::io`.
use std::io::{self, Read, Write};

use crate::cursor::SizeCounter;
use crate::{Consumer, Producer, RingBuffer};

impl<S: SizeCounter> RingBuffer<S> {
    /// Issue a single `read` into the free space and commit what arrived.
    ///
    /// Returns `Ok(0)` on end of input, or when the buffer is full.
    pub fn fill_from(&mut self, mut reader: impl Read) -> io::Result<usize> {
        let n = reader.read(self.writable())?;
        self.commit(n);
        Ok(n)
    }

    /// Issue a single `write` of the buffered bytes and consume what was taken.
    pub fn drain_into(&mut self, mut writer: impl Write) -> io::Result<usize> {
        let n = writer.write(self.readable())?;
        self.consume(n);
        Ok(n)
    }
}

impl<S: SizeCounter> Read for RingBuffer<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

impl<S: SizeCounter> Write for RingBuffer<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_from(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Producer<'_> {
    /// Issue a single `read` into the free space and publish what arrived.
    pub fn fill_from(&mut self, mut reader: impl Read) -> io::Result<usize> {
        let n = reader.read(self.writable())?;
        self.commit(n);
        Ok(n)
    }
}

impl Consumer<'_> {
    /// Issue a single `write` of the buffered bytes and release what was taken.
    pub fn drain_into(&mut self, mut writer: impl Write) -> io::Result<usize> {
        let n = writer.write(self.readable())?;
        self.consume(n);
        Ok(n)
    }
}

impl Write for Producer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_from(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Consumer<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}
