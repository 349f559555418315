//! Chain catalog — the habit definitions, addressed by filtered position.
//!
//! Chains are stored in insertion order. Deleting one shifts the rest down,
//! so an array index is never an identity; `id` is. Callers address chains
//! by 1-based position in the current filtered view, which the catalog
//! resolves to an id and then to an array slot.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::codec::{
    check_name, Chain, ChainHeader, ChainKind, CodecError, Color, Tag, MAX_TAGS, TAG_ID_MAX,
};
use super::error::{StoreError, StoreResult};
use super::record_file::RecordFile;

/// Which chains positional indices refer to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    All,
    #[default]
    Active,
    Stopped,
}

impl Filter {
    pub fn matches(self, chain: &Chain) -> bool {
        match self {
            Self::All => true,
            Self::Active => chain.is_active(),
            Self::Stopped => !chain.is_active(),
        }
    }
}

/// Everything a caller chooses about a new chain.
#[derive(Debug, Clone)]
pub struct NewChain {
    pub name: String,
    pub kind: ChainKind,
    pub color: Color,
    pub created: i64,
}

/// The materialized chain file plus the current filtered view.
#[derive(Debug)]
pub struct ChainCatalog {
    file: RecordFile<ChainHeader, Chain>,
    filter: Filter,
    /// Ids of the chains visible under `filter`, in storage order.
    view: Vec<u16>,
}

fn invalid_name(e: CodecError) -> StoreError {
    StoreError::InvalidName(e.to_string())
}

fn check_kind(kind: ChainKind) -> StoreResult<()> {
    match kind {
        ChainKind::Daily => Ok(()),
        ChainKind::Weekly { min_days } => ChainKind::weekly(min_days)
            .map(|_| ())
            .map_err(|_| StoreError::InvalidMinDays(min_days)),
    }
}

impl ChainCatalog {
    /// Load the chain file. The initial view shows every chain.
    pub fn materialize(path: &Path) -> StoreResult<Self> {
        let file = RecordFile::materialize(path, 1)?;
        let mut catalog = Self {
            file,
            filter: Filter::All,
            view: Vec::new(),
        };
        catalog.refresh_view();
        Ok(catalog)
    }

    /// Restrict positional indices to chains matching `filter`.
    pub fn filter(&mut self, filter: Filter) {
        self.filter = filter;
        self.refresh_view();
    }

    fn refresh_view(&mut self) {
        let filter = self.filter;
        self.view = self
            .file
            .records()
            .iter()
            .filter(|c| filter.matches(c))
            .map(|c| c.id)
            .collect();
    }

    /// Chain id at 1-based `position` in the filtered view.
    pub fn index_to_id(&self, position: usize) -> Option<u16> {
        position
            .checked_sub(1)
            .and_then(|i| self.view.get(i))
            .copied()
    }

    fn slot_of(&self, id: u16) -> Option<usize> {
        self.file.records().iter().position(|c| c.id == id)
    }

    fn resolve(&self, position: usize) -> StoreResult<usize> {
        self.index_to_id(position)
            .and_then(|id| self.slot_of(id))
            .ok_or(StoreError::ChainNotFound(position))
    }

    fn chain_mut(&mut self, position: usize) -> StoreResult<&mut Chain> {
        let slot = self.resolve(position)?;
        self.file
            .get_mut(slot)
            .ok_or(StoreError::ChainNotFound(position))
    }

    pub fn get(&self, id: u16) -> Option<&Chain> {
        self.file.records().iter().find(|c| c.id == id)
    }

    /// Chain at 1-based `position` in the filtered view.
    pub fn at(&self, position: usize) -> StoreResult<&Chain> {
        let slot = self.resolve(position)?;
        Ok(&self.file.records()[slot])
    }

    /// Chains in the filtered view, with their 1-based positions.
    pub fn visible(&self) -> impl Iterator<Item = (usize, &Chain)> + '_ {
        self.view
            .iter()
            .filter_map(|&id| self.get(id))
            .enumerate()
            .map(|(i, c)| (i + 1, c))
    }

    /// Every stored chain, in storage order.
    pub fn all(&self) -> &[Chain] {
        self.file.records()
    }

    pub fn len(&self) -> usize {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    pub fn header(&self) -> &ChainHeader {
        self.file.header()
    }

    /// Append a chain. Its id is the current id counter.
    pub fn add(&mut self, new: NewChain) -> StoreResult<u16> {
        check_name(&new.name).map_err(invalid_name)?;
        check_kind(new.kind)?;

        let header = *self.file.header();
        let id = header.id_counter;
        let (Some(id_counter), Some(count)) =
            (header.id_counter.checked_add(1), header.count.checked_add(1))
        else {
            return Err(StoreError::CapacityExceeded {
                what: "chain store",
                max: u16::MAX as usize,
            });
        };

        self.file.push(Chain {
            id,
            name: new.name,
            created: new.created,
            kind: new.kind,
            color: new.color,
            tags: Vec::new(),
            stopped: None,
        });
        *self.file.header_mut() = ChainHeader { id_counter, count };
        self.refresh_view();

        debug!("added chain {id}");
        Ok(id)
    }

    /// Remove the chain at 1-based `position`. Links that reference it stay
    /// in the link file; its id is never handed out again.
    pub fn delete(&mut self, position: usize) -> StoreResult<Chain> {
        let slot = self.resolve(position)?;
        let chain = self.file.remove(slot);
        let header = self.file.header_mut();
        header.count = header.count.saturating_sub(1);
        self.refresh_view();

        warn!("deleted chain {}; its links are kept but unreachable", chain.id);
        Ok(chain)
    }

    pub fn rename(&mut self, position: usize, name: &str) -> StoreResult<()> {
        check_name(name).map_err(invalid_name)?;
        self.chain_mut(position)?.name = name.to_string();
        Ok(())
    }

    pub fn set_color(&mut self, position: usize, color: Color) -> StoreResult<()> {
        self.chain_mut(position)?.color = color;
        Ok(())
    }

    pub fn set_kind(&mut self, position: usize, kind: ChainKind) -> StoreResult<()> {
        check_kind(kind)?;
        self.chain_mut(position)?.kind = kind;
        Ok(())
    }

    /// Retire the chain at `position` as of `when`. Recomputes the view, so
    /// positions may shift afterwards.
    pub fn stop(&mut self, position: usize, when: i64) -> StoreResult<u16> {
        let chain = self.chain_mut(position)?;
        if chain.stopped.is_some() {
            return Err(StoreError::AlreadyStopped);
        }
        // 0 is the on-disk "active" sentinel.
        chain.stopped = Some(when.max(1));
        let id = chain.id;
        self.refresh_view();
        Ok(id)
    }

    /// Reactivate a stopped chain. Recomputes the view.
    pub fn resume(&mut self, position: usize) -> StoreResult<u16> {
        let chain = self.chain_mut(position)?;
        if chain.stopped.take().is_none() {
            return Err(StoreError::NotStopped);
        }
        let id = chain.id;
        self.refresh_view();
        Ok(id)
    }

    /// Add a tag named `name` to the chain at `position`, using the lowest
    /// free tag id.
    pub fn add_tag(&mut self, position: usize, name: &str) -> StoreResult<Tag> {
        let chain = self.chain_mut(position)?;
        if chain.tag(name).is_some() {
            return Err(StoreError::InvalidTag(format!("{name:?} already exists")));
        }
        if chain.tags.len() >= MAX_TAGS {
            return Err(StoreError::InvalidTag(format!(
                "a chain holds at most {MAX_TAGS} tags"
            )));
        }
        let id = (1..=TAG_ID_MAX)
            .find(|id| chain.tags.iter().all(|t| t.id != *id))
            .ok_or_else(|| StoreError::InvalidTag("no free tag id".into()))?;
        let tag = Tag::new(id, name).map_err(|e| StoreError::InvalidTag(e.to_string()))?;
        chain.tags.push(tag.clone());
        Ok(tag)
    }

    /// Remove a tag from the chain at `position`. The caller clears the
    /// tag's bit from the chain's links.
    pub fn remove_tag(&mut self, position: usize, name: &str) -> StoreResult<Tag> {
        let chain = self.chain_mut(position)?;
        let index = chain
            .tags
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| {
                StoreError::InvalidTag(format!("{name:?} is not a tag of {}", chain.name))
            })?;
        Ok(chain.tags.remove(index))
    }

    pub fn persist(&mut self) -> StoreResult<bool> {
        self.file.persist()
    }
}
