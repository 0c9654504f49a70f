//! Arena-backed job queues.
//!
//! Both of a tracker's ordered queues (pending and active) live in one slab
//! of nodes linked by index. A [`Slot`] stays valid while its node moves
//! between queues, so a tracker can keep an `id → Slot` map and unlink,
//! relink or remove any job in O(1).

/// The queue a node currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Pending,
    Active,
}

/// Stable handle to a node in a [`JobQueues`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(usize);

struct Node<T> {
    item: T,
    queue: Queue,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default, Clone, Copy)]
struct Ends {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Two doubly linked queues sharing one arena.
pub struct JobQueues<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    pending: Ends,
    active: Ends,
}

impl<T> Default for JobQueues<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JobQueues<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            pending: Ends::default(),
            active: Ends::default(),
        }
    }

    pub fn len(&self, queue: Queue) -> usize {
        self.ends(queue).len
    }

    pub fn is_empty(&self, queue: Queue) -> bool {
        self.len(queue) == 0
    }

    pub fn front(&self, queue: Queue) -> Option<Slot> {
        self.ends(queue).head.map(Slot)
    }

    pub fn back(&self, queue: Queue) -> Option<Slot> {
        self.ends(queue).tail.map(Slot)
    }

    pub fn next(&self, slot: Slot) -> Option<Slot> {
        self.node(slot).and_then(|n| n.next).map(Slot)
    }

    pub fn prev(&self, slot: Slot) -> Option<Slot> {
        self.node(slot).and_then(|n| n.prev).map(Slot)
    }

    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.node(slot).map(|n| &n.item)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        self.nodes
            .get_mut(slot.0)
            .and_then(Option::as_mut)
            .map(|n| &mut n.item)
    }

    pub fn queue_of(&self, slot: Slot) -> Option<Queue> {
        self.node(slot).map(|n| n.queue)
    }

    /// Insert an item in front of `before`, or at the back when `before` is
    /// `None`. `before` must belong to `queue`.
    pub fn insert_before(&mut self, queue: Queue, before: Option<Slot>, item: T) -> Slot {
        let node = Node {
            item,
            queue,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.link(idx, queue, before.map(|s| s.0));
        Slot(idx)
    }

    /// Move a node to `queue`, in front of `before` (or at the back). The
    /// node keeps its slot.
    pub fn move_before(&mut self, slot: Slot, queue: Queue, before: Option<Slot>) {
        if self.node(slot).is_none() || before == Some(slot) {
            return;
        }
        self.unlink(slot.0);
        self.link(slot.0, queue, before.map(|s| s.0));
    }

    /// Remove a node from its queue and the arena, returning its item.
    pub fn remove(&mut self, slot: Slot) -> Option<T> {
        self.node(slot)?;
        self.unlink(slot.0);
        let node = self.nodes[slot.0].take()?;
        self.free.push(slot.0);
        Some(node.item)
    }

    /// Iterate a queue front to back.
    pub fn iter(&self, queue: Queue) -> Iter<'_, T> {
        Iter {
            queues: self,
            cursor: self.ends(queue).head,
        }
    }

    fn node(&self, slot: Slot) -> Option<&Node<T>> {
        self.nodes.get(slot.0).and_then(Option::as_ref)
    }

    fn ends(&self, queue: Queue) -> &Ends {
        match queue {
            Queue::Pending => &self.pending,
            Queue::Active => &self.active,
        }
    }

    fn ends_mut(&mut self, queue: Queue) -> &mut Ends {
        match queue {
            Queue::Pending => &mut self.pending,
            Queue::Active => &mut self.active,
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<T> {
        match self.nodes[idx].as_mut() {
            Some(node) => node,
            None => unreachable!("linked index {idx} points at a vacant slot"),
        }
    }

    /// Detach a node from its queue; the node stays in the arena.
    fn unlink(&mut self, idx: usize) {
        let (queue, prev, next) = {
            let node = self.node_mut(idx);
            let links = (node.queue, node.prev, node.next);
            node.prev = None;
            node.next = None;
            links
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.ends_mut(queue).head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.ends_mut(queue).tail = prev,
        }
        self.ends_mut(queue).len -= 1;
    }

    /// Attach a detached node to `queue` in front of `before` (or at the back).
    fn link(&mut self, idx: usize, queue: Queue, before: Option<usize>) {
        let prev = match before {
            Some(b) => self.node_mut(b).prev,
            None => self.ends(queue).tail,
        };
        {
            let node = self.node_mut(idx);
            node.queue = queue;
            node.prev = prev;
            node.next = before;
        }
        match prev {
            Some(p) => self.node_mut(p).next = Some(idx),
            None => self.ends_mut(queue).head = Some(idx),
        }
        match before {
            Some(b) => self.node_mut(b).prev = Some(idx),
            None => self.ends_mut(queue).tail = Some(idx),
        }
        self.ends_mut(queue).len += 1;
    }
}

/// Front-to-back iterator over one queue.
pub struct Iter<'a, T> {
    queues: &'a JobQueues<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Slot, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.queues.nodes.get(idx)?.as_ref()?;
        self.cursor = node.next;
        Some((Slot(idx), &node.item))
    }
}
