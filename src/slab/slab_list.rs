//! Intrusive circular list of slabs.
//!
//! Links live in each slab's metadata, so moving a slab between the free,
//! partial and full lists never allocates. The list itself only keeps the
//! head slab and a length.

use super::slab_node::SlabNode;
use super::slab_order::SlabGeometry;

pub(crate) struct SlabList {
    head: Option<usize>,
    len: usize,
}

impl SlabList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn front(&self) -> Option<usize> {
        self.head
    }

    /// Insert `slab_base` as the new head.
    pub fn push_front(&mut self, geometry: SlabGeometry, slab_base: usize) {
        let mut node = SlabNode::new(slab_base, geometry);

        match self.head {
            None => {
                node.set_prev(slab_base);
                node.set_next(slab_base);
            }
            Some(head) => {
                let mut head_node = SlabNode::new(head, geometry);
                let tail = head_node.prev();
                let mut tail_node = SlabNode::new(tail, geometry);

                node.set_prev(tail);
                node.set_next(head);
                tail_node.set_next(slab_base);
                head_node.set_prev(slab_base);
            }
        }

        self.head = Some(slab_base);
        self.len += 1;
    }

    /// Unlink `slab_base`, which must be a member of this list.
    ///
    /// Returns the slab that followed it, or `None` if the list is now empty.
    pub fn remove(&mut self, geometry: SlabGeometry, slab_base: usize) -> Option<usize> {
        let mut node = SlabNode::new(slab_base, geometry);
        let prev = node.prev();
        let next = node.next();
        node.set_prev(0);
        node.set_next(0);
        self.len = self.len.saturating_sub(1);

        if next == slab_base {
            self.head = None;
            return None;
        }

        SlabNode::new(prev, geometry).set_next(next);
        SlabNode::new(next, geometry).set_prev(prev);
        if self.head == Some(slab_base) {
            self.head = Some(next);
        }
        Some(next)
    }

    pub fn pop_front(&mut self, geometry: SlabGeometry) -> Option<usize> {
        let head = self.head?;
        self.remove(geometry, head);
        Some(head)
    }

    /// Move `slab_base` from `from` to the head of `to`.
    pub fn transfer(geometry: SlabGeometry, slab_base: usize, from: &mut Self, to: &mut Self) {
        from.remove(geometry, slab_base);
        to.push_front(geometry, slab_base);
    }

    #[cfg(test)]
    pub fn contains(&self, geometry: SlabGeometry, slab_base: usize) -> bool {
        self.iter(geometry).any(|base| base == slab_base)
    }

    #[cfg(test)]
    pub fn iter(&self, geometry: SlabGeometry) -> SlabListIter {
        SlabListIter {
            geometry,
            head: self.head,
            cursor: self.head,
        }
    }
}

#[cfg(test)]
pub(crate) struct SlabListIter {
    geometry: SlabGeometry,
    head: Option<usize>,
    cursor: Option<usize>,
}

#[cfg(test)]
impl Iterator for SlabListIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.cursor?;
        let next = SlabNode::new(current, self.geometry).next();
        self.cursor = if Some(next) == self.head {
            None
        } else {
            Some(next)
        };
        Some(current)
    }
}
