#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use wipman::workspace::Workspace;

pub const BACKLOG: &str = "\
id=0000000000
title=Backlog
created=2022-10-01T18:00:00.000Z
updated=2022-10-04T16:41:23.858Z
tags=
---
- [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)
- [ ] Task bar  [bbbbbbbbbb](../bb/bbbbbbbb)
- [x] Task baz  [cccccccccc](../cc/cccccccc)
- [ ] Task qux  [dddddddddd](../dd/dddddddd)
";

pub const HIRU: &str = "\
id=1111111111
title=HIRU
created=2022-10-01T18:00:00.000Z
updated=2022-10-04T16:41:23.858Z
tags=hiru
---
- [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)
- [x] Task baz  [cccccccccc](../cc/cccccccc)
";

pub const UNUSED: &str = "\
id=2222222222
title=Unused
created=2022-10-01T18:00:00.000Z
updated=2022-10-04T16:41:23.858Z
tags=unused
---
";

pub const TASK_FOO: &str = "\
id=aaaaaaaaaa
title=Task foo
created=2022-10-01T18:00:00.000Z
updated=2022-10-04T16:41:23.858Z
tags=hiru
blockedBy=
blocks=
completed=false
---
Notes about foo.
";

pub const TASK_BAR: &str = "\
id=bbbbbbbbbb
title=Task bar
created=2022-10-02T18:00:00.000Z
updated=2022-10-04T16:41:23.858Z
tags=
blockedBy=
blocks=
completed=false
---
";

pub const TASK_BAZ: &str = "\
id=cccccccccc
title=Task baz
created=2022-10-03T18:00:00.000Z
updated=2022-10-04T16:41:23.858Z
tags=hiru
blockedBy=
blocks=
completed=true
---
";

pub const TASK_QUX: &str = "\
id=dddddddddd
title=Task qux
created=2022-10-04T18:00:00.000Z
updated=2022-10-04T18:00:00.000Z
tags=other
blockedBy=
blocks=
completed=false
---
";

/// Every file of the sample root, relative path first.
pub const SAMPLE_FILES: [(&str, &str); 7] = [
    ("views/backlog.view", BACKLOG),
    ("views/hiru.view", HIRU),
    ("views/unused.view", UNUSED),
    ("aa/aaaaaaaa", TASK_FOO),
    ("bb/bbbbbbbb", TASK_BAR),
    ("cc/cccccccc", TASK_BAZ),
    ("dd/dddddddd", TASK_QUX),
];

pub struct TestRoot {
    dir: TempDir,
}

impl TestRoot {
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    /// Backlog, two tagged views and four tasks, all mutually consistent.
    pub fn sample() -> Self {
        let root = Self::empty();
        for (relative, content) in SAMPLE_FILES {
            root.write(relative, content);
        }
        root
    }

    pub fn path(&self) -> PathBuf {
        self.dir
            .path()
            .canonicalize()
            .expect("canonical tempdir")
    }

    pub fn file(&self, relative: &str) -> PathBuf {
        self.path().join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.file(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.file(relative)).expect("read file")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.file(relative).exists()
    }

    pub fn remove(&self, relative: &str) -> PathBuf {
        let path = self.file(relative);
        fs::remove_file(&path).expect("remove file");
        path
    }

    /// Replace the first occurrence of `from` in a file.
    pub fn edit(&self, relative: &str, from: &str, to: &str) -> PathBuf {
        let content = self.read(relative);
        assert!(content.contains(from), "{relative} does not contain {from:?}");
        self.write(relative, &content.replacen(from, to, 1))
    }

    pub fn open(&self) -> Workspace {
        Workspace::open(self.path()).expect("open workspace")
    }

    pub fn assert_sample_unchanged(&self) {
        for (relative, content) in SAMPLE_FILES {
            assert_eq!(self.read(relative), content, "{relative} changed");
        }
    }
}

pub fn is_listed(view_file: &str, task_id: &str) -> bool {
    view_file.contains(&format!("[{task_id}]("))
}

pub fn path_str(path: &Path) -> String {
    path.display().to_string()
}
