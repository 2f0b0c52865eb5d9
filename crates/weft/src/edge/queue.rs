//! Queue configuration and storage for a single edge.

use std::{
	cmp::Ordering,
	collections::{BinaryHeap, VecDeque},
	sync::Arc,
};

use crate::data::TaskData;

/// A user-supplied comparator for priority edges.
/// `Ordering::Less` means "dequeued first".
pub type EdgeComparator<D> = Arc<dyn Fn(&D, &D) -> Ordering + Send + Sync>;

/// How an edge orders the messages it holds.
pub enum EdgeOrdering<D: TaskData> {
	/// First in, first out. The default.
	Fifo,

	/// Dequeue the message with the smallest
	/// [`order_key`](TaskData::order_key) first.
	/// Ties are broken by insertion order.
	Priority,

	/// Dequeue in the order defined by a custom comparator.
	/// Ties are broken by insertion order.
	PriorityBy(EdgeComparator<D>),
}

impl<D: TaskData> Clone for EdgeOrdering<D> {
	fn clone(&self) -> Self {
		match self {
			Self::Fifo => Self::Fifo,
			Self::Priority => Self::Priority,
			Self::PriorityBy(cmp) => Self::PriorityBy(cmp.clone()),
		}
	}
}

/// Per-edge queue configuration.
///
/// The default is an unbounded FIFO queue. A bounded edge blocks producers
/// once it is full, which is the graph's only flow-control mechanism.
pub struct EdgeConfig<D: TaskData> {
	pub(crate) capacity: Option<usize>,
	pub(crate) ordering: EdgeOrdering<D>,
}

impl<D: TaskData> EdgeConfig<D> {
	/// An unbounded FIFO edge.
	pub fn fifo() -> Self {
		Self {
			capacity: None,
			ordering: EdgeOrdering::Fifo,
		}
	}

	/// An unbounded priority edge, lowest
	/// [`order_key`](TaskData::order_key) first.
	pub fn priority() -> Self {
		Self {
			capacity: None,
			ordering: EdgeOrdering::Priority,
		}
	}

	/// An unbounded priority edge with a custom comparator.
	pub fn priority_by(cmp: EdgeComparator<D>) -> Self {
		Self {
			capacity: None,
			ordering: EdgeOrdering::PriorityBy(cmp),
		}
	}

	/// Bound this edge to at most `capacity` queued messages.
	pub fn bounded(mut self, capacity: usize) -> Self {
		self.capacity = Some(capacity);
		self
	}
}

impl<D: TaskData> Default for EdgeConfig<D> {
	fn default() -> Self {
		Self::fifo()
	}
}

impl<D: TaskData> Clone for EdgeConfig<D> {
	fn clone(&self) -> Self {
		Self {
			capacity: self.capacity,
			ordering: self.ordering.clone(),
		}
	}
}

/// A slot in an edge queue. `None` is a wakeup sentinel: it carries no
/// data, and a consumer that dequeues one must re-check its termination
/// condition.
pub(crate) type EdgeSlot<D> = Option<Arc<D>>;

/// The storage behind one edge.
pub(crate) enum EdgeQueue<D: TaskData> {
	Fifo(VecDeque<EdgeSlot<D>>),
	Priority {
		heap: BinaryHeap<PrioritySlot<D>>,
		cmp: Option<EdgeComparator<D>>,
		next_seq: u64,
	},
}

impl<D: TaskData> EdgeQueue<D> {
	pub fn new(ordering: &EdgeOrdering<D>) -> Self {
		match ordering {
			EdgeOrdering::Fifo => Self::Fifo(VecDeque::new()),
			EdgeOrdering::Priority => Self::Priority {
				heap: BinaryHeap::new(),
				cmp: None,
				next_seq: 0,
			},
			EdgeOrdering::PriorityBy(cmp) => Self::Priority {
				heap: BinaryHeap::new(),
				cmp: Some(cmp.clone()),
				next_seq: 0,
			},
		}
	}

	pub fn push(&mut self, slot: EdgeSlot<D>) {
		match self {
			Self::Fifo(queue) => queue.push_back(slot),
			Self::Priority {
				heap,
				cmp,
				next_seq,
			} => {
				heap.push(PrioritySlot {
					slot,
					seq: *next_seq,
					cmp: cmp.clone(),
				});
				*next_seq += 1;
			}
		}
	}

	pub fn pop(&mut self) -> Option<EdgeSlot<D>> {
		match self {
			Self::Fifo(queue) => queue.pop_front(),
			Self::Priority { heap, .. } => heap.pop().map(|p| p.slot),
		}
	}

	pub fn len(&self) -> usize {
		match self {
			Self::Fifo(queue) => queue.len(),
			Self::Priority { heap, .. } => heap.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// A heap entry for priority edges.
///
/// Wakeup sentinels sort before all data so that blocked consumers notice
/// termination promptly.
pub(crate) struct PrioritySlot<D: TaskData> {
	slot: EdgeSlot<D>,
	seq: u64,
	cmp: Option<EdgeComparator<D>>,
}

impl<D: TaskData> PrioritySlot<D> {
	/// `Ordering::Greater` means "dequeued sooner"; [`BinaryHeap`] is a
	/// max-heap.
	fn dequeue_order(&self, other: &Self) -> Ordering {
		let by_key = match (&self.slot, &other.slot) {
			(None, None) => Ordering::Equal,
			(None, Some(_)) => return Ordering::Greater,
			(Some(_), None) => return Ordering::Less,
			(Some(a), Some(b)) => match &self.cmp {
				Some(cmp) => cmp(a, b),
				None => a.order_key().cmp(&b.order_key()),
			},
		};

		match by_key {
			// Smallest key wins, oldest entry breaks ties
			Ordering::Less => Ordering::Greater,
			Ordering::Greater => Ordering::Less,
			Ordering::Equal => other.seq.cmp(&self.seq),
		}
	}
}

impl<D: TaskData> Ord for PrioritySlot<D> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.dequeue_order(other)
	}
}

impl<D: TaskData> PartialOrd for PrioritySlot<D> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl<D: TaskData> PartialEq for PrioritySlot<D> {
	fn eq(&self, other: &Self) -> bool {
		self.dequeue_order(other) == Ordering::Equal
	}
}

impl<D: TaskData> Eq for PrioritySlot<D> {}

#[cfg(test)]
mod tests {
	use super::*;

	struct Keyed(u64);
	impl TaskData for Keyed {
		fn order_key(&self) -> u64 {
			self.0
		}
	}

	#[test]
	fn fifo_preserves_insertion_order() {
		let mut queue = EdgeQueue::new(&EdgeOrdering::<Keyed>::Fifo);
		for i in 0..5 {
			queue.push(Some(Arc::new(Keyed(i))));
		}
		for i in 0..5 {
			assert_eq!(queue.pop().unwrap().unwrap().0, i);
		}
		assert!(queue.pop().is_none());
	}

	#[test]
	fn priority_dequeues_lowest_key_first() {
		let mut queue = EdgeQueue::new(&EdgeOrdering::<Keyed>::Priority);
		for key in [3, 1, 4, 1, 5] {
			queue.push(Some(Arc::new(Keyed(key))));
		}
		let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
			.map(|slot| slot.unwrap().0)
			.collect();
		assert_eq!(order, vec![1, 1, 3, 4, 5]);
	}

	#[test]
	fn priority_breaks_ties_by_insertion() {
		let mut queue = EdgeQueue::new(&EdgeOrdering::<Keyed>::Priority);
		let first = Arc::new(Keyed(7));
		let second = Arc::new(Keyed(7));
		queue.push(Some(first.clone()));
		queue.push(Some(second.clone()));
		assert!(Arc::ptr_eq(&queue.pop().unwrap().unwrap(), &first));
		assert!(Arc::ptr_eq(&queue.pop().unwrap().unwrap(), &second));
	}

	#[test]
	fn priority_sentinels_sort_first() {
		let mut queue = EdgeQueue::new(&EdgeOrdering::<Keyed>::Priority);
		queue.push(Some(Arc::new(Keyed(0))));
		queue.push(None);
		assert!(queue.pop().unwrap().is_none());
		assert!(queue.pop().unwrap().is_some());
	}

	#[test]
	fn custom_comparator_inverts_order() {
		let cmp: EdgeComparator<Keyed> =
			Arc::new(|a, b| b.order_key().cmp(&a.order_key()));
		let mut queue = EdgeQueue::new(&EdgeOrdering::PriorityBy(cmp));
		for key in [1, 3, 2] {
			queue.push(Some(Arc::new(Keyed(key))));
		}
		let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
			.map(|slot| slot.unwrap().0)
			.collect();
		assert_eq!(order, vec![3, 2, 1]);
	}
}
