//! ## Directory tree
//!
//! The tree is an arena keyed by the logical sector of each descriptor.
//! Directories hold the ids of their children and their parent, never references,
//! so the whole catalog can be rebuilt from disk after any change.

use std::collections::BTreeMap;
use std::fmt;
use super::types::{FileMeta,FLAG_EMULATE,FLAG_PROTECTED,FLAG_MODIFIED,SECTOR_SIZE};

/// Directory id, the logical sector of its descriptor (VIB for the root)
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash,PartialOrd,Ord)]
pub struct DirId(pub usize);

impl DirId {
    pub const ROOT: DirId = DirId(0);
}

/// File id, the logical sector of its FIB or FDR
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash,PartialOrd,Ord)]
pub struct FileId(pub usize);

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum Entry {
    File(FileId),
    Dir(DirId)
}

/// Run of consecutive logical sectors
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct Extent {
    pub start: usize,
    pub count: usize
}

#[derive(Clone,Debug)]
pub struct TFile {
    pub id: FileId,
    pub parent: DirId,
    pub name: String,
    pub meta: FileMeta,
    /// data sectors recorded in the descriptor
    pub sectors: usize,
    pub created: Option<chrono::NaiveDateTime>,
    pub updated: Option<chrono::NaiveDateTime>,
    pub extents: Vec<Extent>,
    /// every AU the file owns, including the one holding its descriptor
    pub aus: Vec<usize>
}

impl TFile {
    pub fn is_protected(&self) -> bool {
        self.meta.flags & FLAG_PROTECTED != 0
    }
    pub fn is_emulate(&self) -> bool {
        self.meta.flags & FLAG_EMULATE != 0
    }
    pub fn is_modified(&self) -> bool {
        self.meta.flags & FLAG_MODIFIED != 0
    }
    /// Length of a program image, or of the whole allocation for data files
    pub fn byte_len(&self) -> usize {
        if self.meta.is_program() && self.sectors > 0 && self.meta.eof_offset > 0 {
            (self.sectors - 1) * SECTOR_SIZE + self.meta.eof_offset as usize
        } else {
            self.sectors * SECTOR_SIZE
        }
    }
}

#[derive(Clone,Debug)]
pub struct Directory {
    pub id: DirId,
    pub name: String,
    pub parent: Option<DirId>,
    pub files: Vec<FileId>,
    pub subdirs: Vec<DirId>,
    /// logical sector of the file index
    pub fdir: usize,
    /// AUs owned by the directory itself; empty for a floppy root, the FDIR AU for a hard disk root
    pub aus: Vec<usize>
}

impl Directory {
    pub fn new(id: DirId,name: &str,parent: Option<DirId>,fdir: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent,
            files: Vec::new(),
            subdirs: Vec::new(),
            fdir,
            aus: Vec::new()
        }
    }
}

#[derive(Clone,Debug)]
pub struct Catalog {
    dirs: BTreeMap<DirId,Directory>,
    files: BTreeMap<FileId,TFile>
}

impl Catalog {
    pub fn new(root: Directory) -> Self {
        let mut dirs = BTreeMap::new();
        dirs.insert(root.id,root);
        Self { dirs, files: BTreeMap::new() }
    }
    /// Insert a directory and link it under its parent
    pub fn add_dir(&mut self,dir: Directory) {
        if let Some(parent) = dir.parent.and_then(|p| self.dirs.get_mut(&p)) {
            if !parent.subdirs.contains(&dir.id) {
                parent.subdirs.push(dir.id);
            }
        }
        self.dirs.insert(dir.id,dir);
    }
    /// Insert a file and link it under its parent
    pub fn add_file(&mut self,file: TFile) {
        if let Some(parent) = self.dirs.get_mut(&file.parent) {
            if !parent.files.contains(&file.id) {
                parent.files.push(file.id);
            }
        }
        self.files.insert(file.id,file);
    }
    pub fn contains_dir(&self,id: DirId) -> bool {
        self.dirs.contains_key(&id)
    }
    pub fn dir(&self,id: DirId) -> Option<&Directory> {
        self.dirs.get(&id)
    }
    pub fn file(&self,id: FileId) -> Option<&TFile> {
        self.files.get(&id)
    }
    pub fn children(&self,id: DirId) -> Vec<&TFile> {
        match self.dirs.get(&id) {
            Some(d) => d.files.iter().filter_map(|f| self.files.get(f)).collect(),
            None => Vec::new()
        }
    }
    pub fn subdirectories(&self,id: DirId) -> Vec<&Directory> {
        match self.dirs.get(&id) {
            Some(d) => d.subdirs.iter().filter_map(|s| self.dirs.get(s)).collect(),
            None => Vec::new()
        }
    }
    /// Look up a name among the files and subdirectories of `dir`
    pub fn find(&self,dir: DirId,name: &str) -> Option<Entry> {
        if let Some(f) = self.children(dir).iter().find(|f| f.name==name) {
            return Some(Entry::File(f.id));
        }
        self.subdirectories(dir).iter().find(|d| d.name==name).map(|d| Entry::Dir(d.id))
    }
    /// Resolve a path such as `DIR1.FILE` or `/DIR1/FILE`, an empty path is the root
    pub fn resolve(&self,path: &str) -> Option<Entry> {
        let mut curr = Entry::Dir(DirId::ROOT);
        for part in path.split(['/','.']).filter(|s| !s.is_empty()) {
            curr = match curr {
                Entry::Dir(d) => self.find(d,part)?,
                Entry::File(_) => return None
            };
        }
        Some(curr)
    }
    /// Path of a directory, components joined with `.`, empty for the root
    pub fn dir_path(&self,id: DirId) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut curr = self.dirs.get(&id);
        while let Some(d) = curr {
            if d.parent.is_none() || parts.len() > self.dirs.len() {
                break;
            }
            parts.push(d.name.clone());
            curr = d.parent.and_then(|p| self.dirs.get(&p));
        }
        parts.reverse();
        parts.join(".")
    }
    pub fn file_path(&self,id: FileId) -> Option<String> {
        let f = self.files.get(&id)?;
        let dir = self.dir_path(f.parent);
        Some(match dir.is_empty() {
            true => f.name.clone(),
            false => [dir,f.name.clone()].join(".")
        })
    }
    /// Directories in depth first order starting from the root
    pub fn walk_dirs(&self) -> Vec<DirId> {
        let mut ans = Vec::new();
        let mut stack = vec![DirId::ROOT];
        while let Some(id) = stack.pop() {
            if ans.contains(&id) {
                continue;
            }
            ans.push(id);
            if let Some(d) = self.dirs.get(&id) {
                stack.extend(d.subdirs.iter().rev());
            }
        }
        ans
    }
    /// Sum of AUs held by all files and directories
    pub fn aus_in_use(&self) -> usize {
        self.files.values().map(|f| f.aus.len()).sum::<usize>() + self.dirs.values().map(|d| d.aus.len()).sum::<usize>()
    }
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(id) => write!(f,"file at sector {}",id.0),
            Self::Dir(id) => write!(f,"directory at sector {}",id.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: usize,parent: DirId,name: &str) -> TFile {
        TFile {
            id: FileId(id),
            parent,
            name: name.to_string(),
            meta: FileMeta::program(300),
            sectors: 2,
            created: None,
            updated: None,
            extents: vec![Extent { start: id+1, count: 2 }],
            aus: vec![id,id+1,id+2]
        }
    }

    #[test]
    fn resolve_paths() {
        let mut cat = Catalog::new(Directory::new(DirId::ROOT,"VOL",None,1));
        let mut sub = Directory::new(DirId(40),"GAMES",Some(DirId::ROOT),41);
        sub.aus = vec![40,41];
        cat.add_dir(sub);
        cat.add_file(file(10,DirId::ROOT,"LOAD"));
        cat.add_file(file(50,DirId(40),"CHESS"));
        assert_eq!(cat.resolve("LOAD"),Some(Entry::File(FileId(10))));
        assert_eq!(cat.resolve("GAMES.CHESS"),Some(Entry::File(FileId(50))));
        assert_eq!(cat.resolve("/GAMES/CHESS"),Some(Entry::File(FileId(50))));
        assert_eq!(cat.resolve("GAMES"),Some(Entry::Dir(DirId(40))));
        assert_eq!(cat.resolve(""),Some(Entry::Dir(DirId::ROOT)));
        assert_eq!(cat.resolve("LOAD.X"),None);
        assert_eq!(cat.file_path(FileId(50)),Some("GAMES.CHESS".to_string()));
        assert_eq!(cat.walk_dirs(),vec![DirId::ROOT,DirId(40)]);
        assert_eq!(cat.aus_in_use(),8);
        assert_eq!(cat.file(FileId(10)).unwrap().byte_len(),300);
    }
}
