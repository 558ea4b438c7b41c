// The detector channel map changes over the lifetime of the experiment (detectors are
// moved between strings, switched off, replaced). The CSV file therefore holds several
// validity blocks, each starting at a `valid_from` stamp, and every row of a block maps a
// DAQ channel key to its detector:
// valid_from -> channel -> ChannelInfo(name, string, position, processable)
// Rows of one block share the same `valid_from` and blocks may appear in any order.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;
use serde::Serialize;
use time::OffsetDateTime;

use super::error::ChannelMapError;
use super::series::parse_stamp;

const ENTRIES_PER_LINE: usize = 6; //Number of elements in a single row in the CSV file

/// Everything known about one detector channel for a validity block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub channel: String,
    pub name: String,
    pub string: u32,
    pub position: u32,
    pub processable: bool,
}

/// ChannelMap contains the mapping of DAQ channel keys to detectors for every validity
/// block of the experiment.
///
/// The file is a CSV where each row contains 6 elements:
/// `valid_from,channel,name,string,position,processable`
///
/// A map always holds at least one block.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    blocks: Vec<(OffsetDateTime, FxHashMap<String, ChannelInfo>)>,
}

impl ChannelMap {
    /// Create a new ChannelMap from a CSV file
    pub fn new(path: &Path) -> Result<Self, ChannelMapError> {
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        Self::from_csv(&contents)
    }

    /// Parse the CSV contents; the first line is a header
    pub fn from_csv(contents: &str) -> Result<Self, ChannelMapError> {
        let mut blocks: FxHashMap<OffsetDateTime, FxHashMap<String, ChannelInfo>> =
            FxHashMap::default();

        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(',').map(|e| e.trim()).collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat);
            }

            let valid_from = parse_stamp(entries[0])?;
            let info = ChannelInfo {
                channel: entries[1].to_string(),
                name: entries[2].to_string(),
                string: entries[3].parse()?,
                position: entries[4].parse()?,
                processable: entries[5].to_lowercase().parse()?,
            };
            blocks
                .entry(valid_from)
                .or_default()
                .insert(info.channel.clone(), info);
        }

        if blocks.is_empty() {
            return Err(ChannelMapError::Empty);
        }
        let mut blocks: Vec<_> = blocks.into_iter().collect();
        blocks.sort_by_key(|(valid_from, _)| *valid_from);
        Ok(Self { blocks })
    }

    /// The mapping valid at a timestamp: the latest block starting at or before it, or the
    /// first block if the timestamp precedes all of them.
    pub fn at(&self, timestamp: &OffsetDateTime) -> &FxHashMap<String, ChannelInfo> {
        let idx = self
            .blocks
            .partition_point(|(valid_from, _)| valid_from <= timestamp)
            .saturating_sub(1);
        &self.blocks[idx].1
    }

    /// Processable detector channels valid at a timestamp grouped by string, each string
    /// sorted by position. Excluded channels (e.g. the pulser) are left out.
    pub fn strings_at(
        &self,
        timestamp: &OffsetDateTime,
        excluded: &[&str],
    ) -> Vec<(u32, Vec<ChannelInfo>)> {
        let mut strings: FxHashMap<u32, Vec<ChannelInfo>> = FxHashMap::default();
        for info in self.at(timestamp).values() {
            if !info.processable || excluded.contains(&info.channel.as_str()) {
                continue;
            }
            strings.entry(info.string).or_default().push(info.clone());
        }
        let mut strings: Vec<_> = strings.into_iter().collect();
        strings.sort_by_key(|(string, _)| *string);
        for (_, channels) in strings.iter_mut() {
            channels.sort_by(|a, b| (a.position, &a.channel).cmp(&(b.position, &b.channel)));
        }
        strings
    }
}
