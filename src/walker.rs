//! Resource tree walker.
//!
//! `walk` produces the resources a recursive operation acts on, in
//! pre-order (a collection before its members) with the members of
//! each collection sorted by name. Post-order is simply the reverse.
use std::collections::HashSet;

use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::fs::{DavFileSystem, DavMetaData, FsError, FsResult};

/// Collections nested deeper than this are treated as a loop.
pub const MAX_WALK_DEPTH: usize = 1024;

/// One visited resource.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path of the resource. Collections end in a slash.
    pub path: DavPath,
    pub meta: Box<dyn DavMetaData>,
    /// Distance from the root of the walk.
    pub depth: usize,
}

/// Result of a walk.
#[derive(Debug, Default)]
pub struct Walk {
    /// Visited resources, in pre-order.
    pub entries: Vec<WalkEntry>,
    /// Collections whose members could not be listed. They are still
    /// present in `entries`, but their members are not.
    pub errors: Vec<(DavPath, FsError)>,
}

impl Walk {
    /// Entries in post-order (members before their collection).
    pub fn post_order(&self) -> impl Iterator<Item = &WalkEntry> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk the tree below `root`, `depth` levels deep.
///
/// Fails if the root does not exist, or if the back-end returns a
/// structure that is not a tree (`FsError::LoopDetected`).
pub async fn walk(fs: &dyn DavFileSystem, root: &DavPath, depth: Depth) -> FsResult<Walk> {
    let meta = fs.metadata(root).await?;
    let mut root = root.clone();
    root.add_slash_if(meta.is_dir());

    let max_depth = match depth {
        Depth::Zero => 0,
        Depth::One => 1,
        Depth::Infinity => usize::MAX,
    };

    let mut walk = Walk::default();
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut stack = vec![WalkEntry {
        path: root,
        meta,
        depth: 0,
    }];

    while let Some(entry) = stack.pop() {
        if !seen.insert(trimmed(&entry.path)) {
            debug!("walk: {} visited twice", entry.path);
            return Err(FsError::LoopDetected);
        }
        if entry.depth > MAX_WALK_DEPTH {
            debug!("walk: {} is nested too deep", entry.path);
            return Err(FsError::LoopDetected);
        }

        if entry.meta.is_dir() && entry.depth < max_depth {
            match fs.read_dir(&entry.path).await {
                Ok(mut members) => {
                    members.sort_by(|a, b| a.name.cmp(&b.name));
                    // reversed, so that the first name is popped first.
                    for m in members.into_iter().rev() {
                        let mut path = entry.path.join(&m.name);
                        path.add_slash_if(m.meta.is_dir());
                        stack.push(WalkEntry {
                            path,
                            meta: m.meta,
                            depth: entry.depth + 1,
                        });
                    }
                }
                Err(e) => {
                    debug!("walk: read_dir {}: {}", entry.path, e);
                    walk.errors.push((entry.path.clone(), e));
                }
            }
        }
        walk.entries.push(entry);
    }
    Ok(walk)
}

fn trimmed(path: &DavPath) -> Vec<u8> {
    let p = path.as_bytes();
    if p.len() > 1 && p.ends_with(b"/") {
        p[..p.len() - 1].to_vec()
    } else {
        p.to_vec()
    }
}

#[cfg(all(test, feature = "memfs"))]
mod tests {
    use super::*;
    use std::time::SystemTime;

    use bytes::Bytes;
    use futures_util::future::{self, FutureExt};

    use crate::fs::{DavDirEntry, FsFuture};
    use crate::memfs::MemFs;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    async fn tree() -> Box<MemFs> {
        let fs = MemFs::new();
        for d in ["/c/", "/c/b/", "/c/a/", "/c/a/deep/"] {
            fs.create_dir(&p(d)).await.unwrap();
        }
        for f in ["/c/z.txt", "/c/a/f1", "/c/a/deep/f2"] {
            fs.write(&p(f), Bytes::from_static(b"x")).await.unwrap();
        }
        fs
    }

    fn names(w: &Walk) -> Vec<String> {
        w.entries.iter().map(|e| e.path.as_url_string()).collect()
    }

    #[tokio::test]
    async fn depths() {
        let fs = tree().await;
        let w = walk(&*fs, &p("/c"), Depth::Zero).await.unwrap();
        assert_eq!(names(&w), vec!["/c/"]);

        let w = walk(&*fs, &p("/c"), Depth::One).await.unwrap();
        assert_eq!(names(&w), vec!["/c/", "/c/a/", "/c/b/", "/c/z.txt"]);

        let w = walk(&*fs, &p("/c/"), Depth::Infinity).await.unwrap();
        assert_eq!(
            names(&w),
            vec!["/c/", "/c/a/", "/c/a/deep/", "/c/a/deep/f2", "/c/a/f1", "/c/b/", "/c/z.txt"]
        );
        let post: Vec<_> = w.post_order().map(|e| e.path.as_url_string()).collect();
        assert_eq!(post.first().unwrap(), "/c/z.txt");
        assert_eq!(post.last().unwrap(), "/c/");

        assert_eq!(walk(&*fs, &p("/nope"), Depth::Zero).await.unwrap_err(), FsError::NotFound);
    }

    // A back-end that claims every collection contains itself.
    #[derive(Debug, Clone)]
    struct Loopy {
        dup: bool,
    }

    #[derive(Debug, Clone)]
    struct DirMeta;

    impl DavMetaData for DirMeta {
        fn len(&self) -> u64 {
            0
        }
        fn modified(&self) -> FsResult<SystemTime> {
            Ok(SystemTime::UNIX_EPOCH)
        }
        fn is_dir(&self) -> bool {
            true
        }
    }

    impl DavFileSystem for Loopy {
        fn metadata<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
            future::ready(Ok(Box::new(DirMeta) as Box<dyn DavMetaData>)).boxed()
        }
        fn read_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Vec<DavDirEntry>> {
            let entry = DavDirEntry {
                name: b"x".to_vec(),
                meta: Box::new(DirMeta),
            };
            let v = if self.dup { vec![entry.clone(), entry] } else { vec![entry] };
            future::ready(Ok(v)).boxed()
        }
        fn read<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Bytes> {
            future::ready(Err(FsError::NotFound)).boxed()
        }
        fn write<'a>(&'a self, _path: &'a DavPath, _data: Bytes) -> FsFuture<'a, ()> {
            future::ready(Err(FsError::Forbidden)).boxed()
        }
    }

    #[tokio::test]
    async fn loops_are_detected() {
        let fs = Loopy { dup: false };
        assert_eq!(walk(&fs, &p("/"), Depth::Infinity).await.unwrap_err(), FsError::LoopDetected);
        assert_eq!(walk(&fs, &p("/"), Depth::One).await.unwrap().len(), 2);
        let fs = Loopy { dup: true };
        assert_eq!(walk(&fs, &p("/"), Depth::One).await.unwrap_err(), FsError::LoopDetected);
    }
}
