use std::rc::Rc;

use hashbrown::HashSet as FastSet;
use log::{debug, trace};

use crate::HiveOffset;
use crate::err::{HiveError, Result};
use crate::hive::{Hive, PATH_SEPARATOR, ROOT_PATH};
use crate::node::Node;
use crate::source::ReadAt;

struct Pending {
    path: String,
    node: Node,
    /// Offsets of the keys above `node`.
    ancestors: Rc<Vec<HiveOffset>>,
}

/// Depth-first traversal of a hive in listing order, yielding `(path, node)`.
///
/// A key that is its own ancestor is reported as [`HiveError::CycleDetected`] and not descended
/// into. A key listed under several parents is yielded at each of them but expanded only once.
/// A key whose listing fails is yielded first, then its error.
pub struct Walk<'h, S: ReadAt> {
    hive: &'h Hive<S>,
    stack: Vec<Pending>,
    /// Keys whose children were already pushed.
    expanded: FastSet<HiveOffset, ahash::RandomState>,
    pending_error: Option<HiveError>,
}

impl<'h, S: ReadAt> Walk<'h, S> {
    pub(crate) fn new(hive: &'h Hive<S>) -> Self {
        let mut walk = Walk {
            hive,
            stack: vec![],
            expanded: FastSet::with_hasher(ahash::RandomState::new()),
            pending_error: None,
        };

        match hive.root() {
            Ok(root) => walk.stack.push(Pending {
                path: ROOT_PATH.to_owned(),
                node: root,
                ancestors: Rc::new(vec![]),
            }),
            Err(e) => walk.pending_error = Some(e),
        }
        walk
    }

    fn child_path(parent: &str, name: &str) -> String {
        if parent == ROOT_PATH {
            name.to_owned()
        } else {
            format!("{parent}{PATH_SEPARATOR}{name}")
        }
    }
}

impl<S: ReadAt> Iterator for Walk<'_, S> {
    type Item = Result<(String, Node)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }

        let Pending {
            path,
            node,
            ancestors,
        } = self.stack.pop()?;

        if node.is_dir() {
            if ancestors.contains(&node.offset()) {
                return Some(Err(HiveError::CycleDetected {
                    offset: node.offset(),
                }));
            }
            if !self.expanded.insert(node.offset()) {
                debug!("`{}`: key at 0x{:08x} already walked, not descending again", path, node.offset());
                return Some(Ok((path, node)));
            }

            match self.hive.children(&node) {
                Ok(children) => {
                    trace!("`{}`: {} entries", path, children.len());
                    let mut below = ancestors.as_ref().clone();
                    below.push(node.offset());
                    let below = Rc::new(below);

                    for child in children.into_iter().rev() {
                        self.stack.push(Pending {
                            path: Self::child_path(&path, child.name()),
                            node: child,
                            ancestors: Rc::clone(&below),
                        });
                    }
                }
                Err(e) => self.pending_error = Some(e),
            }
        }

        Some(Ok((path, node)))
    }
}
