//! Capture-group range partitioning for match rendering.
//!
//! Divides a matched substring into sorted, non-overlapping, gap-free
//! ranges, each either unattributed (plain match highlight) or attributed
//! to exactly one capture group. Groups are inserted longest first so that
//! broad groups get subdivided by the narrower ones that follow.

use crate::matches::{CaptureGroup, FileMatch};

/// One attributed sub-range of a match, in offsets relative to the match
/// start. `group` is None for plain match text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRange {
	pub start: usize,
	pub end: usize,
	pub group: Option<CaptureGroup>,
}

impl MatchRange {
	fn new(start: usize, end: usize, group: Option<CaptureGroup>) -> Self {
		MatchRange {
			start: start.min(end),
			end: start.max(end),
			group,
		}
	}

	pub fn len(&self) -> usize {
		self.end - self.start
	}

	pub fn is_empty(&self) -> bool {
		self.start == self.end
	}

	/// Slice of the match text covered by this range.
	pub fn text<'a>(&self, match_text: &'a str) -> &'a str {
		&match_text[self.start..self.end]
	}
}

/// Partition a match into attributed ranges. Empty ranges produced by
/// abutting groups are retained here; renderers drop them via
/// [`nonempty_ranges`].
pub fn partition(mat: &FileMatch) -> Vec<MatchRange> {
	let len = mat.text.len();
	let mut ranges = vec![MatchRange::new(0, len, None)];

	// Longest first: later, narrower groups subdivide earlier, broader ones
	let mut groups: Vec<&CaptureGroup> = mat.groups.iter().collect();
	groups.sort_by(|a, b| b.length.cmp(&a.length));

	for group in groups {
		// Rebase to match-relative offsets; groups outside the span are ignored
		let Some(start) = group.start.checked_sub(mat.start) else {
			continue;
		};
		let end = start + group.length;
		if end > len {
			continue;
		}
		insert(&mut ranges, start, end, group);
	}

	ranges.sort_by_key(|r| r.start);
	ranges
}

/// Partition and drop the zero-length ranges, ready for rendering.
pub fn nonempty_ranges(mat: &FileMatch) -> Vec<MatchRange> {
	partition(mat)
		.into_iter()
		.filter(|r| !r.is_empty())
		.collect()
}

fn insert(ranges: &mut Vec<MatchRange>, start: usize, end: usize, group: &CaptureGroup) {
	let attributed = Some(group.clone());

	//gggggg
	//xxxxxx
	if let Some(pos) = ranges.iter().position(|r| r.start == start && r.end == end) {
		ranges.remove(pos);
		ranges.push(MatchRange::new(start, end, attributed));
		return;
	}

	//gg
	//xxxxxx
	if let Some(pos) = ranges.iter().position(|r| r.start == start && r.end > end) {
		let head = ranges.remove(pos);
		ranges.push(MatchRange::new(start, end, attributed));
		ranges.push(MatchRange::new(end, head.end, head.group));
		return;
	}

	//    gg
	//xxxxxx
	if let Some(pos) = ranges.iter().position(|r| r.start < start && r.end == end) {
		let tail = ranges.remove(pos);
		ranges.push(MatchRange::new(tail.start, start, tail.group));
		ranges.push(MatchRange::new(start, end, attributed));
		return;
	}

	//  gg
	//xxxxxx
	if let Some(pos) = ranges.iter().position(|r| r.start < start && r.end > end) {
		let outer = ranges.remove(pos);
		ranges.push(MatchRange::new(outer.start, start, outer.group.clone()));
		ranges.push(MatchRange::new(start, end, attributed));
		ranges.push(MatchRange::new(end, outer.end, outer.group));
		return;
	}

	//   gggg
	//xxxxxyyyyy
	let mut spanned: Vec<usize> = ranges
		.iter()
		.enumerate()
		.filter(|(_, r)| (r.start < start && r.end < end) || (r.start > start && r.end > end))
		.map(|(i, _)| i)
		.collect();
	if spanned.len() == 2 {
		spanned.sort_by_key(|&i| ranges[i].start);
		let second = ranges.remove(spanned[1]);
		let first = ranges.remove(spanned[0]);
		ranges.push(MatchRange::new(first.start, start, first.group));
		ranges.push(MatchRange::new(start, end, attributed));
		ranges.push(MatchRange::new(end, second.end, second.group));
	}
}
