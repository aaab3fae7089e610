use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::container::DecompressedContainer;
use crate::record::{FixedRecord, RecordView};
use crate::splice::{self, Splice};
use crate::value::{ParsedTree, TreeParser, ValuePath};
use crate::{ReserveError, Result};

/// One open container together with the value tree parsed from it.
///
/// A structural edit leaves every offset outside the touched array only
/// approximately right, so the session refuses further edits until the tree
/// has been rebuilt with [`EditSession::reparse`] or
/// [`EditSession::save_and_reload`].
pub struct EditSession<P> {
    path: Option<PathBuf>,
    save_dir: Option<PathBuf>,
    container: DecompressedContainer,
    tree: ParsedTree,
    parser: P,
    stale: bool,
}

impl<P: TreeParser> EditSession<P> {
    pub fn open(path: &Path, parser: P) -> Result<Self> {
        let container = DecompressedContainer::read_file(path)?;
        let mut session = Self::from_container(container, parser)?;
        session.path = Some(path.to_path_buf());
        Ok(session)
    }

    pub fn from_container(container: DecompressedContainer, parser: P) -> Result<Self> {
        let tree = parser.parse(&container.data)?;
        Ok(Self {
            path: None,
            save_dir: None,
            container,
            tree,
            parser,
            stale: false,
        })
    }

    /// Makes [`EditSession::checkpoint`] persist into `dir`.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn tree(&self) -> &ParsedTree {
        &self.tree
    }

    pub fn payload(&self) -> &[u8] {
        &self.container.data
    }

    pub fn container(&self) -> &DecompressedContainer {
        &self.container
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Reads the record stored at `record_path`.
    pub fn record(&self, record_path: &ValuePath) -> Result<FixedRecord> {
        let node = self
            .tree
            .root
            .get(record_path)
            .ok_or_else(|| ReserveError::NotFound(format!("no record at {record_path}")))?;
        RecordView::read(node)
    }

    pub fn insert_record(&mut self, array_path: &ValuePath, record: &FixedRecord) -> Result<Splice> {
        self.ensure_fresh()?;
        let splice = splice::insert_record(&mut self.container.data, &mut self.tree, array_path, record)?;
        self.stale = true;
        debug!(array = %array_path, count = splice.new_count, "record inserted");
        Ok(splice)
    }

    pub fn remove_record(&mut self, array_path: &ValuePath, victim: usize) -> Result<Splice> {
        self.ensure_fresh()?;
        let splice = splice::remove_record(&mut self.container.data, &mut self.tree, array_path, victim)?;
        self.stale = true;
        debug!(array = %array_path, count = splice.new_count, "record removed");
        Ok(splice)
    }

    /// Overwrites the record at `record_path` without changing the payload
    /// size.
    pub fn rewrite_record(&mut self, record_path: &ValuePath, record: &FixedRecord) -> Result<()> {
        self.ensure_fresh()?;
        let node = self
            .tree
            .root
            .get_mut(record_path)
            .ok_or_else(|| ReserveError::NotFound(format!("no record at {record_path}")))?;
        RecordView::write_in_place(&mut self.container.data, node, record)
    }

    pub fn reparse(&mut self) -> Result<()> {
        self.tree = self.parser.parse(&self.container.data)?;
        self.stale = false;
        Ok(())
    }

    /// Writes the container into `dir` under its original file name.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let name = self
            .path
            .as_deref()
            .and_then(Path::file_name)
            .ok_or_else(|| ReserveError::NotFound("session has no source file name".to_string()))?;
        let target = dir.join(name);
        self.save_as(&target)?;
        Ok(target)
    }

    pub fn save_as(&self, target: &Path) -> Result<()> {
        self.container.write_file(target)?;
        info!(path = %target.display(), bytes = self.container.data.len(), "saved population");
        Ok(())
    }

    /// Saves into `dir`, then reopens the saved file and rebuilds the tree
    /// from it.
    pub fn save_and_reload(&mut self, dir: &Path) -> Result<PathBuf> {
        let target = self.save(dir)?;
        self.container = DecompressedContainer::read_file(&target)?;
        self.path = Some(target.clone());
        self.reparse()?;
        Ok(target)
    }

    /// Closes one unit of work: saves and reloads when a save directory is
    /// set, otherwise rebuilds the tree in memory.
    pub fn checkpoint(&mut self) -> Result<()> {
        match self.save_dir.clone() {
            Some(dir) => self.save_and_reload(&dir).map(|_| ()),
            None => self.reparse(),
        }
    }

    fn ensure_fresh(&self) -> Result<()> {
        if self.stale {
            return Err(ReserveError::StaleTree);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Gender;
    use crate::testing::{build_container, record, FixtureParser};
    use tempfile::tempdir;

    fn animals(group: usize) -> ValuePath {
        ValuePath::root().member("Groups").index(group).member("Animals")
    }

    fn groups() -> Vec<Vec<FixedRecord>> {
        vec![
            vec![record(Gender::Male, 1), record(Gender::Female, 2)],
            vec![record(Gender::Female, 3)],
        ]
    }

    #[test]
    fn second_structural_edit_needs_a_reparse() {
        let mut session = EditSession::from_container(build_container(&groups()), FixtureParser).unwrap();
        session.insert_record(&animals(0), &record(Gender::Male, 10)).unwrap();
        assert!(session.is_stale());

        let before = session.payload().to_vec();
        let err = session.insert_record(&animals(1), &record(Gender::Male, 11)).unwrap_err();
        assert!(matches!(err, ReserveError::StaleTree));
        assert!(matches!(
            session.rewrite_record(&animals(0).index(0), &record(Gender::Male, 12)),
            Err(ReserveError::StaleTree)
        ));
        assert_eq!(session.payload(), &before[..]);

        session.reparse().unwrap();
        session.insert_record(&animals(1), &record(Gender::Male, 11)).unwrap();
    }

    #[test]
    fn removal_also_needs_a_reparse() {
        let mut session = EditSession::from_container(build_container(&groups()), FixtureParser).unwrap();
        session.remove_record(&animals(0), 0).unwrap();
        assert!(session.is_stale());

        let before = session.payload().to_vec();
        assert!(matches!(session.remove_record(&animals(0), 0), Err(ReserveError::StaleTree)));
        assert!(matches!(
            session.insert_record(&animals(1), &record(Gender::Male, 11)),
            Err(ReserveError::StaleTree)
        ));
        assert_eq!(session.payload(), &before[..]);

        session.reparse().unwrap();
        assert_eq!(session.record(&animals(0).index(0)).unwrap().id, 2);
    }

    #[test]
    fn refused_removal_leaves_session_fresh() {
        let mut container = build_container(&groups());
        // Padding is not part of the parsed record, so the re-encoded victim
        // no longer matches the stored bytes.
        let parsed = FixtureParser.parse(&container.data).unwrap();
        let victim = parsed.root.get(&animals(1).index(0)).unwrap().data_offset as usize;
        container.data[victim + 2] = 0x5A;

        let mut session = EditSession::from_container(container, FixtureParser).unwrap();
        let before = session.payload().to_vec();
        let err = session.remove_record(&animals(1), 0).unwrap_err();
        assert!(matches!(err, ReserveError::Consistency { offset } if offset == victim));
        assert!(!session.is_stale());
        assert_eq!(session.payload(), &before[..]);
        session.remove_record(&animals(0), 0).unwrap();
    }

    #[test]
    fn failed_edit_does_not_mark_stale() {
        let mut session = EditSession::from_container(build_container(&groups()), FixtureParser).unwrap();
        let missing = ValuePath::root().member("Groups").index(9).member("Animals");
        assert!(session.insert_record(&missing, &record(Gender::Male, 1)).is_err());
        assert!(!session.is_stale());
    }

    #[test]
    fn rewrite_keeps_size_and_reparses_cleanly() {
        let mut session = EditSession::from_container(build_container(&groups()), FixtureParser).unwrap();
        let len = session.payload().len();
        let target = animals(0).index(1);
        let mut replacement = session.record(&target).unwrap();
        replacement.weight = 77.25;
        replacement.visual_seed = 4242;

        session.rewrite_record(&target, &replacement).unwrap();
        assert_eq!(session.payload().len(), len);
        assert!(!session.is_stale());
        session.reparse().unwrap();
        assert_eq!(session.record(&target).unwrap(), replacement);
    }

    #[test]
    fn save_and_reload_round_trips_through_disk() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = source.path().join("animal_population_3");
        build_container(&groups()).write_file(&path).unwrap();

        let mut session = EditSession::open(&path, FixtureParser).unwrap();
        session.insert_record(&animals(1), &record(Gender::Male, 40)).unwrap();
        let saved = session.save_and_reload(out.path()).unwrap();

        assert_eq!(saved, out.path().join("animal_population_3"));
        assert_eq!(session.path(), Some(saved.as_path()));
        assert!(!session.is_stale());
        let [first, second] = session.container().decompressed_size_fields();
        assert_eq!(first, second);
        assert_eq!(first as usize, 5 + session.payload().len());
        assert_eq!(session.record(&animals(1).index(0)).unwrap().id, 40);
        assert_eq!(session.record(&animals(1).index(1)).unwrap().id, 3);
    }

    #[test]
    fn checkpoint_persists_into_the_save_dir() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = source.path().join("animal_population_5");
        build_container(&groups()).write_file(&path).unwrap();

        let mut session = EditSession::open(&path, FixtureParser).unwrap().with_save_dir(out.path());
        session.remove_record(&animals(0), 0).unwrap();
        session.checkpoint().unwrap();

        assert!(!session.is_stale());
        let saved = out.path().join("animal_population_5");
        assert_eq!(session.path(), Some(saved.as_path()));
        let on_disk = DecompressedContainer::read_file(&saved).unwrap();
        assert_eq!(on_disk.data, session.payload());
    }

    #[test]
    fn checkpoint_without_save_dir_only_reparses() {
        let mut session = EditSession::from_container(build_container(&groups()), FixtureParser).unwrap();
        session.insert_record(&animals(1), &record(Gender::Male, 9)).unwrap();
        session.checkpoint().unwrap();
        assert!(!session.is_stale());
        assert!(session.path().is_none());
        assert_eq!(session.record(&animals(1).index(0)).unwrap().id, 9);
    }

    #[test]
    fn save_without_a_source_name_is_refused() {
        let session = EditSession::from_container(build_container(&groups()), FixtureParser).unwrap();
        let dir = tempdir().unwrap();
        assert!(matches!(session.save(dir.path()), Err(ReserveError::NotFound(_))));
    }
}
