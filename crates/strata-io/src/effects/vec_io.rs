//! Vectored reads.
//!
//! Slots are merged into ranges, packed into multi-range requests and the
//! answers scattered back into the slots. Whatever a multi-range request
//! did not deliver is fetched with one single-range request per merged
//! range, spread over a few parallel workers.

use strata_transport::{Error, ErrorKind, Method, Result, scope};
use tracing::{debug, trace, warn};

use super::chain::{IoLink, Next};
use super::context::IoChainContext;
use super::request::HttpRequest;
use crate::core::{
    BoundaryLine, ByteRange, ContentRange, IntervalTree, MAX_BLANK_LINES, PartHeader, RangeBatch,
    check_status, classify_line, extract_boundary, merge_ranges, pack_range_headers,
    parse_content_range, parse_part_header, range_header,
};
use crate::data::{IoVec, MultirangeResult, VecOptions};

const MAX_PART_LINE: usize = 8 * 1024;
const COPY_CHUNK: usize = 64 * 1024;

fn multipart_error(message: impl Into<String>) -> Error {
    Error::new(scope::VEC, ErrorKind::MultipartParse, message)
}

/// Copies body bytes into every slot they overlap.
struct SlotSink<'v, 'b> {
    slots: Vec<&'v mut IoVec<'b>>,
    tree: IntervalTree<usize>,
}

impl<'v, 'b> SlotSink<'v, 'b> {
    fn new(slots: Vec<&'v mut IoVec<'b>>) -> Self {
        let tree = IntervalTree::new(slots.iter().enumerate().filter_map(|(i, slot)| {
            ByteRange::from_len(slot.offset, slot.buffer.len() as u64).map(|r| (r, i))
        }));
        Self { slots, tree }
    }

    fn write(&mut self, offset: u64, data: &[u8]) {
        let Some(chunk) = ByteRange::from_len(offset, data.len() as u64) else {
            return;
        };
        let slots = &mut self.slots;
        self.tree.for_each_overlapping(chunk, |range, i| {
            let start = range.start.max(chunk.start);
            let end = range.end.min(chunk.end);
            let slot = &mut *slots[i];
            let dst = (start - slot.offset) as usize;
            let src = (start - chunk.start) as usize;
            let len = (end - start + 1) as usize;
            slot.buffer[dst..dst + len].copy_from_slice(&data[src..src + len]);
            // `filled` only grows over contiguous data.
            if dst <= slot.filled {
                slot.filled = slot.filled.max(dst + len);
            }
        });
    }
}

/// What the parts of one multi-range answer delivered.
struct Coverage {
    ranges: Vec<ByteRange>,
    received: Vec<u64>,
    total: Option<u64>,
    all_done: bool,
}

impl Coverage {
    fn new(ranges: &[ByteRange]) -> Self {
        Self {
            ranges: ranges.to_vec(),
            received: vec![0; ranges.len()],
            total: None,
            all_done: false,
        }
    }

    /// Index of the requested range holding `part`.
    fn locate(&self, part: ByteRange) -> Result<usize> {
        self.ranges
            .iter()
            .position(|r| r.contains(&part))
            .ok_or_else(|| multipart_error(format!("part {part} was not requested")))
    }

    fn add(&mut self, index: usize, part: &ContentRange) {
        self.received[index] += part.range.size();
        if part.total.is_some() {
            self.total = part.total;
        }
    }

    fn mark_all(&mut self) {
        self.all_done = true;
    }

    fn is_complete(&self, index: usize) -> bool {
        if self.all_done {
            return true;
        }
        let r = self.ranges[index];
        // Ranges reaching past the end of the entity are served short.
        let expected = match self.total {
            Some(total) if r.start >= total => 0,
            Some(total) => r.end.min(total - 1) - r.start + 1,
            None => r.size(),
        };
        self.received[index] >= expected
    }

    fn incomplete(&self) -> impl Iterator<Item = ByteRange> + '_ {
        (0..self.ranges.len())
            .filter(|&i| !self.is_complete(i))
            .map(|i| self.ranges[i])
    }
}

/// Copy body bytes into `sink` starting at `offset`, stopping after `limit`
/// bytes if given. Returns the number copied.
fn copy_body(
    req: &mut HttpRequest<'_>,
    sink: &mut SlotSink<'_, '_>,
    mut offset: u64,
    limit: Option<u64>,
) -> Result<u64> {
    let mut chunk = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;
    loop {
        let want = match limit {
            Some(limit) if copied >= limit => break,
            Some(limit) => (limit - copied).min(COPY_CHUNK as u64) as usize,
            None => COPY_CHUNK,
        };
        let n = req.read_block(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        sink.write(offset, &chunk[..n]);
        offset += n as u64;
        copied += n as u64;
    }
    Ok(copied)
}

fn skip_body(req: &mut HttpRequest<'_>, count: u64) -> Result<u64> {
    let mut scratch = vec![0u8; COPY_CHUNK];
    let mut skipped = 0u64;
    while skipped < count {
        let want = (count - skipped).min(COPY_CHUNK as u64) as usize;
        let n = req.read_block(&mut scratch[..want])?;
        if n == 0 {
            break;
        }
        skipped += n as u64;
    }
    Ok(skipped)
}

/// One line of multipart framing; running out of body or an over-long
/// line is a multipart failure.
fn part_line(req: &mut HttpRequest<'_>, context: &str) -> Result<Vec<u8>> {
    match req.read_line(MAX_PART_LINE) {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(multipart_error(format!("multipart body ended {context}"))),
        Err(e) if e.kind() == ErrorKind::InvalidServerResponse => {
            Err(multipart_error(e.message().to_string()))
        }
        Err(e) => Err(e),
    }
}

/// Walk a `multipart/byteranges` body, scattering each part.
fn read_parts(
    req: &mut HttpRequest<'_>,
    boundary: &str,
    sink: &mut SlotSink<'_, '_>,
    coverage: &mut Coverage,
) -> Result<()> {
    loop {
        let mut blanks = 0;
        loop {
            let line = part_line(req, "before its terminator")?;
            match classify_line(&line, boundary) {
                BoundaryLine::Blank => {
                    blanks += 1;
                    if blanks > MAX_BLANK_LINES {
                        return Err(multipart_error("too many blank lines between parts"));
                    }
                }
                BoundaryLine::Part => break,
                BoundaryLine::End => return Ok(()),
                BoundaryLine::Other => {
                    return Err(multipart_error("expected a part boundary"));
                }
            }
        }

        let mut content_range = None;
        loop {
            let line = part_line(req, "inside part headers")?;
            match parse_part_header(&line) {
                Some(PartHeader::EndOfHeaders) => break,
                Some(PartHeader::ContentRange(cr)) => content_range = Some(cr),
                Some(PartHeader::Ignored) => {}
                None => return Err(multipart_error("invalid part header")),
            }
        }
        let part = content_range.ok_or_else(|| multipart_error("part without Content-Range"))?;
        let index = coverage.locate(part.range)?;
        let size = part.range.size();
        let copied = copy_body(req, sink, part.range.start, Some(size))?;
        if copied < size {
            return Err(multipart_error(format!(
                "part {} truncated after {copied} bytes",
                part.range
            )));
        }
        trace!(target: "strata::vec", range = %part.range, "part received");
        coverage.add(index, &part);
    }
}

/// A 206 answering a multi-range request with a single plain range.
fn read_single_part(
    req: &mut HttpRequest<'_>,
    sink: &mut SlotSink<'_, '_>,
    coverage: &mut Coverage,
) -> Result<()> {
    let part = req
        .header_value("Content-Range")
        .and_then(|v| parse_content_range(&v))
        .ok_or_else(|| multipart_error("206 answer is neither multipart nor ranged"))?;
    let index = coverage.locate(part.range)?;
    let size = part.range.size();
    let copied = copy_body(req, sink, part.range.start, Some(size))?;
    if copied < size {
        return Err(multipart_error("single part truncated"));
    }
    coverage.add(index, &part);
    Ok(())
}

fn request_batch(
    ctx: &IoChainContext<'_>,
    batch: &RangeBatch,
    sink: &mut SlotSink<'_, '_>,
    coverage: &mut Coverage,
    requested: u64,
    opts: &VecOptions,
) -> Result<MultirangeResult> {
    let mut req = ctx
        .request(Method::Get)
        .header("Range", batch.header.as_str());
    req.execute()?;
    match req.status() {
        206 => {
            let content_type = req.header_value("Content-Type").unwrap_or_default();
            let outcome = match extract_boundary(&content_type) {
                Some(boundary) => read_parts(&mut req, &boundary, sink, coverage),
                None => read_single_part(&mut req, sink, coverage),
            };
            match outcome {
                Ok(()) => {
                    req.finish()?;
                    Ok(MultirangeResult::Success)
                }
                Err(e) if e.kind() == ErrorKind::MultipartParse => {
                    warn!(target: "strata::vec", url = %ctx.url, error = %e, "multi-range answer unusable");
                    Ok(MultirangeResult::NoMultirange)
                }
                Err(e) => Err(e),
            }
        }
        200 => {
            let too_large = match req.content_length() {
                Some(len) => {
                    len > opts.full_body_min_size
                        && len > requested.saturating_mul(opts.full_body_ratio)
                }
                None => true,
            };
            if too_large {
                debug!(target: "strata::vec", url = %ctx.url, "multi-range ignored, entity too large to slice");
                return Ok(MultirangeResult::NoMultirange);
            }
            debug!(target: "strata::vec", url = %ctx.url, "multi-range ignored, slicing the entity");
            copy_body(&mut req, sink, 0, None)?;
            Ok(MultirangeResult::SuccessButNoMultirange)
        }
        416 => {
            coverage.mark_all();
            req.finish()?;
            Ok(MultirangeResult::Success)
        }
        status => {
            check_status(status, "vectored read")?;
            Ok(MultirangeResult::NoMultirange)
        }
    }
}

/// Multi-range pass. Returns the merged ranges still to fetch.
fn read_multirange(
    ctx: &IoChainContext<'_>,
    merged: &[ByteRange],
    slots: &mut [IoVec<'_>],
    opts: &VecOptions,
) -> Result<Vec<ByteRange>> {
    let requested: u64 = merged.iter().map(ByteRange::size).sum();
    let mut sink = SlotSink::new(slots.iter_mut().collect());
    let mut remaining = Vec::new();
    let mut multirange_works = true;

    for batch in pack_range_headers(merged, opts.header_budget) {
        if batch.ranges.len() == 1 || !multirange_works {
            remaining.extend(batch.ranges);
            continue;
        }
        let mut coverage = Coverage::new(&batch.ranges);
        match request_batch(ctx, &batch, &mut sink, &mut coverage, requested, opts)? {
            MultirangeResult::Success => remaining.extend(coverage.incomplete()),
            MultirangeResult::SuccessButNoMultirange => return Ok(Vec::new()),
            MultirangeResult::NoMultirange => {
                multirange_works = false;
                remaining.extend(coverage.incomplete());
            }
        }
    }
    Ok(remaining)
}

/// Fetch one merged range with a single-range request.
fn fetch_range(
    ctx: &IoChainContext<'_>,
    range: ByteRange,
    members: Vec<&mut IoVec<'_>>,
) -> Result<()> {
    let mut sink = SlotSink::new(members);
    let mut req = ctx
        .request(Method::Get)
        .header("Range", range_header(range));
    req.execute()?;
    match req.status() {
        206 => {
            let start = req
                .header_value("Content-Range")
                .and_then(|v| parse_content_range(&v))
                .map_or(range.start, |cr| cr.range.start);
            copy_body(&mut req, &mut sink, start, None)?;
        }
        200 => {
            // Range ignored; the session is dropped with the rest unread.
            if skip_body(&mut req, range.start)? == range.start {
                copy_body(&mut req, &mut sink, range.start, Some(range.size()))?;
            }
        }
        416 => req.finish()?,
        status => check_status(status, "range read")?,
    }
    Ok(())
}

/// Per-range pass over `connections` parallel workers.
fn read_fallback(
    ctx: &IoChainContext<'_>,
    ranges: &[ByteRange],
    slots: &mut [IoVec<'_>],
    connections: usize,
) -> Result<()> {
    let mut groups: Vec<(ByteRange, Vec<&mut IoVec<'_>>)> =
        ranges.iter().map(|&r| (r, Vec::new())).collect();
    for slot in slots.iter_mut() {
        let Some(span) = ByteRange::from_len(slot.offset, slot.buffer.len() as u64) else {
            continue;
        };
        let index = ranges.partition_point(|r| r.end < span.start);
        if let Some((range, members)) = groups.get_mut(index) {
            if range.contains(&span) {
                slot.filled = 0;
                members.push(slot);
            }
        }
    }
    groups.retain(|(_, members)| !members.is_empty());

    let workers = connections.max(1).min(groups.len());
    debug!(target: "strata::vec", ranges = groups.len(), workers, "per-range requests");
    if workers <= 1 {
        for (range, members) in groups {
            fetch_range(ctx, range, members)?;
        }
        return Ok(());
    }

    let mut buckets: Vec<Vec<_>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, group) in groups.into_iter().enumerate() {
        buckets[i % workers].push(group);
    }
    std::thread::scope(|s| {
        let handles: Vec<_> = buckets
            .into_iter()
            .map(|bucket| {
                s.spawn(move || -> Result<()> {
                    for (range, members) in bucket {
                        fetch_range(ctx, range, members)?;
                    }
                    Ok(())
                })
            })
            .collect();
        let mut first_error = None;
        for handle in handles {
            let outcome = handle.join().unwrap_or_else(|_| {
                Err(Error::new(scope::VEC, ErrorKind::Unknown, "range worker panicked"))
            });
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    })
}

/// Fill every slot of a vectored read. Returns the total of `filled`.
pub fn read_vectored(ctx: &IoChainContext<'_>, slots: &mut [IoVec<'_>]) -> Result<u64> {
    for slot in slots.iter_mut() {
        slot.filled = 0;
    }
    let requested: Vec<ByteRange> = slots
        .iter()
        .filter_map(|s| ByteRange::from_len(s.offset, s.buffer.len() as u64))
        .collect();
    if requested.is_empty() {
        return Ok(0);
    }

    let opts = ctx.vec_options();
    let merged = merge_ranges(&requested, opts.merge_window);
    debug!(
        target: "strata::vec",
        url = %ctx.url,
        slots = slots.len(),
        merged = merged.len(),
        "vectored read"
    );

    let remaining = if merged.len() > 1 && opts.multirange {
        read_multirange(ctx, &merged, slots, &opts)?
    } else {
        merged
    };
    if !remaining.is_empty() {
        read_fallback(ctx, &remaining, slots, opts.connections)?;
    }
    Ok(slots.iter().map(|s| s.filled as u64).sum())
}

/// Single positioned read through the per-range path.
pub fn read_at(ctx: &IoChainContext<'_>, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut slot = [IoVec::new(offset, buf)];
    read_vectored(ctx, &mut slot)?;
    Ok(slot[0].filled)
}

/// Last link: serves `pread_vec`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VecIoLink;

impl IoLink for VecIoLink {
    fn name(&self) -> &'static str {
        "vec_io"
    }

    fn pread_vec(
        &self,
        ctx: &mut IoChainContext<'_>,
        slots: &mut [IoVec<'_>],
        _next: Next<'_>,
    ) -> Result<u64> {
        read_vectored(ctx, slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_scatters_overlapping_slots() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut c = [0u8; 2];
        let mut slots = [IoVec::new(0, &mut a), IoVec::new(2, &mut b), IoVec::new(10, &mut c)];
        {
            let mut sink = SlotSink::new(slots.iter_mut().collect());
            sink.write(0, b"abcdef");
            sink.write(10, b"z");
        }
        assert_eq!(slots[0].data(), b"abcd");
        assert_eq!(slots[1].data(), b"cdef");
        assert_eq!(slots[2].data(), b"z");
    }

    #[test]
    fn test_sink_filled_stays_contiguous() {
        let mut a = [0u8; 6];
        let mut slots = [IoVec::new(0, &mut a)];
        {
            let mut sink = SlotSink::new(slots.iter_mut().collect());
            sink.write(4, b"ef");
        }
        assert_eq!(slots[0].filled, 0);
        {
            let mut sink = SlotSink::new(slots.iter_mut().collect());
            sink.write(0, b"abcd");
        }
        assert_eq!(slots[0].filled, 4);
    }

    #[test]
    fn test_coverage_completion() {
        let ranges = [ByteRange::new(0, 9), ByteRange::new(100, 199)];
        let mut coverage = Coverage::new(&ranges);
        let first = ContentRange {
            range: ByteRange::new(0, 9),
            total: Some(150),
        };
        let index = coverage.locate(first.range).unwrap();
        coverage.add(index, &first);
        assert!(coverage.is_complete(0));
        assert!(!coverage.is_complete(1));

        // The entity ends at 149, so 100-149 completes the second range.
        let second = ContentRange {
            range: ByteRange::new(100, 149),
            total: Some(150),
        };
        coverage.add(coverage.locate(second.range).unwrap(), &second);
        assert_eq!(coverage.incomplete().count(), 0);

        let err = coverage.locate(ByteRange::new(5, 20)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MultipartParse);
    }
}
