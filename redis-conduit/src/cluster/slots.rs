//! Slot ownership table

use super::slot::{calculate_slot, CLUSTER_SLOTS};
use redis_conduit_core::{
    error::{RedisError, RedisResult},
    types::{Endpoint, SlotRange},
    value::Response,
};
use std::cmp::Ordering;

/// A slot range and the nodes serving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    /// Slots covered
    pub range: SlotRange,
    /// Node owning the range
    pub master: Endpoint,
    /// Replicas of the master, in reply order
    pub replicas: Vec<Endpoint>,
}

/// Immutable view of which node owns which slot.
///
/// Entries are sorted and never overlap. Updates produce a new table, so a
/// reader holding one never observes a half-applied change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotTable {
    entries: Vec<SlotEntry>,
}

impl SlotTable {
    /// Build a table from entries in any order
    ///
    /// # Errors
    ///
    /// Returns an error if a range is inverted, out of bounds, or overlaps
    /// another one.
    pub fn new(mut entries: Vec<SlotEntry>) -> RedisResult<Self> {
        entries.sort_by_key(|e| e.range.start);
        for entry in &entries {
            if entry.range.start > entry.range.end || entry.range.end >= CLUSTER_SLOTS {
                return Err(RedisError::Cluster(format!(
                    "invalid slot range {}-{}",
                    entry.range.start, entry.range.end
                )));
            }
        }
        for pair in entries.windows(2) {
            if pair[1].range.start <= pair[0].range.end {
                return Err(RedisError::Cluster(format!(
                    "overlapping slot ranges {}-{} and {}-{}",
                    pair[0].range.start, pair[0].range.end, pair[1].range.start, pair[1].range.end
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a `CLUSTER SLOTS` reply.
    ///
    /// Each element is `[start, end, [host, port, id, ...], replicas...]`.
    /// An empty or `?` host means "the node you asked", i.e. `seed`.
    /// Discovered nodes are reached with the seed's credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is not an array or an entry is malformed.
    pub fn from_cluster_slots(reply: &Response, seed: &Endpoint) -> RedisResult<Self> {
        let mut entries = Vec::new();
        for item in reply.as_slice()? {
            let fields = item.as_slice()?;
            if fields.len() < 3 {
                return Err(RedisError::Cluster(format!(
                    "CLUSTER SLOTS entry has {} fields",
                    fields.len()
                )));
            }
            let start = slot_number(&fields[0])?;
            let end = slot_number(&fields[1])?;
            let master = node(&fields[2], seed)?;
            let replicas = fields[3..]
                .iter()
                .filter_map(|n| node(n, seed).ok())
                .collect();
            entries.push(SlotEntry {
                range: SlotRange::new(start, end),
                master,
                replicas,
            });
        }
        Self::new(entries)
    }

    /// Entry covering `slot`
    pub fn entry(&self, slot: u16) -> Option<&SlotEntry> {
        self.entries
            .binary_search_by(|e| {
                if slot < e.range.start {
                    Ordering::Greater
                } else if slot > e.range.end {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Master owning `slot`
    pub fn master_for(&self, slot: u16) -> Option<&Endpoint> {
        self.entry(slot).map(|e| &e.master)
    }

    /// Slot the keys of one request go to.
    ///
    /// `None` for keyless requests. Keys on different slots are accepted
    /// only when a single known node owns all of them; the node rejects
    /// the request itself if it cannot serve it.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::CrossSlot`] when the keys span nodes.
    pub fn slot_for_keys(&self, keys: &[&[u8]]) -> RedisResult<Option<u16>> {
        let mut slots = keys.iter().map(|k| calculate_slot(k));
        let Some(first) = slots.next() else {
            return Ok(None);
        };
        let owner = self.master_for(first);
        for slot in slots {
            if slot == first {
                continue;
            }
            match (owner, self.master_for(slot)) {
                (Some(a), Some(b)) if a == b => {}
                _ => {
                    return Err(RedisError::CrossSlot(format!(
                        "keys hash to slots {first} and {slot} on different nodes"
                    )))
                }
            }
        }
        Ok(Some(first))
    }

    /// Copy of this table with `slot` reassigned to `master`.
    ///
    /// Only that slot changes: the range holding it is split around it and
    /// the rest keeps its previous owner.
    #[must_use]
    pub fn with_moved(&self, slot: u16, master: &Endpoint) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 2);
        let mut placed = false;
        for entry in &self.entries {
            if !entry.range.contains(slot) {
                if !placed && entry.range.start > slot {
                    entries.push(single(slot, master));
                    placed = true;
                }
                entries.push(entry.clone());
                continue;
            }
            if &entry.master == master {
                return self.clone();
            }
            if entry.range.start < slot {
                entries.push(SlotEntry {
                    range: SlotRange::new(entry.range.start, slot - 1),
                    ..entry.clone()
                });
            }
            entries.push(single(slot, master));
            if entry.range.end > slot {
                entries.push(SlotEntry {
                    range: SlotRange::new(slot + 1, entry.range.end),
                    ..entry.clone()
                });
            }
            placed = true;
        }
        if !placed {
            entries.push(single(slot, master));
        }
        Self { entries }
    }

    /// Whether every slot has an owner
    pub fn is_complete(&self) -> bool {
        self.entries.iter().map(|e| e.range.len()).sum::<usize>() == usize::from(CLUSTER_SLOTS)
    }

    /// Distinct masters, in slot order
    pub fn masters(&self) -> Vec<Endpoint> {
        let mut out: Vec<Endpoint> = Vec::new();
        for entry in &self.entries {
            if !out.contains(&entry.master) {
                out.push(entry.master.clone());
            }
        }
        out
    }

    /// Every node in the table, masters first
    pub fn nodes(&self) -> Vec<Endpoint> {
        let mut out = self.masters();
        for replica in self.entries.iter().flat_map(|e| &e.replicas) {
            if !out.contains(replica) {
                out.push(replica.clone());
            }
        }
        out
    }

    /// Entries in slot order
    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    /// Whether no slot is assigned
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn single(slot: u16, master: &Endpoint) -> SlotEntry {
    SlotEntry {
        range: SlotRange::new(slot, slot),
        master: master.clone(),
        replicas: Vec::new(),
    }
}

fn slot_number(value: &Response) -> RedisResult<u16> {
    let n = value.as_int()?;
    u16::try_from(n)
        .ok()
        .filter(|&s| s < CLUSTER_SLOTS)
        .ok_or_else(|| RedisError::Cluster(format!("slot {n} out of range")))
}

fn node(value: &Response, seed: &Endpoint) -> RedisResult<Endpoint> {
    let fields = value.as_slice()?;
    if fields.len() < 2 {
        return Err(RedisError::Cluster("CLUSTER SLOTS node has no port".into()));
    }
    let host = match &fields[0] {
        Response::Null => String::new(),
        other => other.as_string()?,
    };
    let host = if host.is_empty() || host == "?" {
        seed.host.clone()
    } else {
        host
    };
    let port = u16::try_from(fields[1].as_int()?)
        .map_err(|_| RedisError::Cluster("CLUSTER SLOTS port out of range".into()))?;
    Ok(Endpoint::new(host, port).inherit_credentials(seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    fn entry(start: u16, end: u16, port: u16) -> SlotEntry {
        SlotEntry {
            range: SlotRange::new(start, end),
            master: ep(port),
            replicas: Vec::new(),
        }
    }

    fn three_nodes() -> SlotTable {
        SlotTable::new(vec![
            entry(10923, 16383, 7002),
            entry(0, 5460, 7000),
            entry(5461, 10922, 7001),
        ])
        .unwrap()
    }

    fn node_reply(host: &str, port: i64) -> Response {
        Response::Array(vec![
            Response::from(host),
            Response::Integer(port),
            Response::from("f00d"),
        ])
    }

    #[test]
    fn test_lookup() {
        let table = three_nodes();
        assert!(table.is_complete());
        assert_eq!(table.master_for(0), Some(&ep(7000)));
        assert_eq!(table.master_for(5461), Some(&ep(7001)));
        assert_eq!(table.master_for(16383), Some(&ep(7002)));
        assert_eq!(table.masters(), vec![ep(7000), ep(7001), ep(7002)]);
    }

    #[test]
    fn test_rejects_overlap() {
        let err = SlotTable::new(vec![entry(0, 100, 7000), entry(100, 200, 7001)]).unwrap_err();
        assert!(matches!(err, RedisError::Cluster(_)));
        assert!(SlotTable::new(vec![entry(0, 16384, 7000)]).is_err());
    }

    #[test]
    fn test_moved_updates_only_that_slot() {
        let table = three_nodes();
        let moved = table.with_moved(100, &ep(7009));

        assert_eq!(moved.master_for(100), Some(&ep(7009)));
        assert_eq!(moved.master_for(99), Some(&ep(7000)));
        assert_eq!(moved.master_for(101), Some(&ep(7000)));
        assert_eq!(moved.master_for(0), Some(&ep(7000)));
        assert_eq!(moved.master_for(5460), Some(&ep(7000)));
        assert!(moved.is_complete());
        assert_eq!(table.master_for(100), Some(&ep(7000)));
    }

    #[test]
    fn test_moved_at_range_edges() {
        let moved = three_nodes().with_moved(0, &ep(7001));
        assert_eq!(moved.master_for(0), Some(&ep(7001)));
        assert_eq!(moved.master_for(1), Some(&ep(7000)));

        let moved = moved.with_moved(16383, &ep(7000));
        assert_eq!(moved.master_for(16383), Some(&ep(7000)));
        assert_eq!(moved.master_for(16382), Some(&ep(7002)));
        assert!(moved.is_complete());
    }

    #[test]
    fn test_moved_into_unassigned_slot() {
        let table = SlotTable::new(vec![entry(0, 10, 7000), entry(20, 30, 7001)]).unwrap();
        let moved = table.with_moved(15, &ep(7002));
        assert_eq!(moved.master_for(15), Some(&ep(7002)));
        let starts: Vec<u16> = moved.entries().iter().map(|e| e.range.start).collect();
        assert_eq!(starts, vec![0, 15, 20]);

        let moved = SlotTable::default().with_moved(42, &ep(7000));
        assert_eq!(moved.master_for(42), Some(&ep(7000)));
    }

    #[test]
    fn test_moved_to_current_owner_is_noop() {
        let table = three_nodes();
        assert_eq!(table.with_moved(100, &ep(7000)), table);
    }

    #[test]
    fn test_slot_for_keys() {
        let table = three_nodes();
        assert_eq!(table.slot_for_keys(&[]).unwrap(), None);
        assert_eq!(table.slot_for_keys(&[b"foo".as_slice()]).unwrap(), Some(12182));
        assert_eq!(
            table
                .slot_for_keys(&[b"{user1}.a".as_slice(), b"{user1}.b"])
                .unwrap(),
            Some(calculate_slot(b"user1"))
        );
        // foo -> 12182 (7002), bar -> 5061 (7000)
        let err = table.slot_for_keys(&[b"foo".as_slice(), b"bar"]).unwrap_err();
        assert!(matches!(err, RedisError::CrossSlot(_)));
    }

    #[test]
    fn test_same_node_different_slots() {
        let table = SlotTable::new(vec![entry(0, 16383, 7000)]).unwrap();
        assert_eq!(table.slot_for_keys(&[b"foo".as_slice(), b"bar"]).unwrap(), Some(12182));

        let partial = SlotTable::new(vec![entry(0, 100, 7000)]).unwrap();
        assert!(partial.slot_for_keys(&[b"foo".as_slice(), b"bar"]).is_err());
    }

    #[test]
    fn test_from_cluster_slots() {
        let seed = Endpoint::new("seed.local", 7000).with_credentials(None, Some("pw".into()));
        let reply = Response::Array(vec![
            Response::Array(vec![
                Response::Integer(0),
                Response::Integer(8191),
                node_reply("", 7000),
                node_reply("10.0.0.2", 7003),
            ]),
            Response::Array(vec![
                Response::Integer(8192),
                Response::Integer(16383),
                node_reply("10.0.0.3", 7001),
            ]),
        ]);
        let table = SlotTable::from_cluster_slots(&reply, &seed).unwrap();
        assert!(table.is_complete());

        let first = table.entry(0).unwrap();
        assert_eq!(first.master.host, "seed.local");
        assert_eq!(first.master.password.as_deref(), Some("pw"));
        assert_eq!(first.replicas[0].address(), "10.0.0.2:7003");
        assert_eq!(table.master_for(9000).unwrap().address(), "10.0.0.3:7001");
        assert_eq!(table.nodes().len(), 3);
    }

    #[test]
    fn test_from_cluster_slots_malformed() {
        let seed = ep(7000);
        assert!(SlotTable::from_cluster_slots(&Response::from("nope"), &seed).is_err());
        let short = Response::Array(vec![Response::Array(vec![Response::Integer(0)])]);
        assert!(SlotTable::from_cluster_slots(&short, &seed).is_err());
        let bad_slot = Response::Array(vec![Response::Array(vec![
            Response::Integer(0),
            Response::Integer(20000),
            node_reply("h", 1),
        ])]);
        assert!(SlotTable::from_cluster_slots(&bad_slot, &seed).is_err());
    }
}
