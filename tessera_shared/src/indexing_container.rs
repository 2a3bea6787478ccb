use std::{collections::VecDeque, fmt, marker::PhantomData};

use derive_where::derive_where;

/// Generational handle into an [`IndexingContainer`].
///
/// A handle stays valid until the element it points to is removed. Slots are reused after
/// removal but the generation is bumped so that stale handles are rejected.
#[derive_where(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle<T> {
    index: usize,
    generation: usize,
    phantom_data: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: usize, generation: usize) -> Self {
        Self {
            index,
            generation,
            phantom_data: PhantomData,
        }
    }

    /// Returns the index of the handle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the generation of the handle.
    pub fn generation(&self) -> usize {
        self.generation
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// Pool of values addressed by [`Handle`]s. Removed slots go to a free list and are
/// handed out again by later insertions.
pub struct IndexingContainer<T> {
    data: Vec<Option<T>>,
    generations: Vec<usize>,
    free_list: VecDeque<usize>,
}

impl<T> Default for IndexingContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexingContainer<T> {
    /// Creates a new empty container.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            generations: Vec::new(),
            free_list: VecDeque::new(),
        }
    }

    /// Inserts a new element into the container.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(free_index) = self.free_list.pop_front() {
            self.data[free_index] = Some(value);
            Handle::new(free_index, self.generations[free_index])
        } else {
            let index = self.data.len();
            self.data.push(Some(value));
            self.generations.push(0);
            Handle::new(index, 0)
        }
    }

    /// Removes the element at the given handle and returns it.
    pub fn remove(&mut self, handle: &Handle<T>) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        self.generations[handle.index()] += 1;
        self.free_list.push_back(handle.index());
        self.data[handle.index()].take()
    }

    /// Returns whether the handle points to a live element.
    pub fn contains(&self, handle: &Handle<T>) -> bool {
        self.generations.get(handle.index()) == Some(&handle.generation()) && self.data[handle.index()].is_some()
    }

    /// Returns a reference to the element at the given handle.
    pub fn get(&self, handle: &Handle<T>) -> Option<&T> {
        if self.contains(handle) {
            self.data[handle.index()].as_ref()
        } else {
            None
        }
    }

    /// Returns a mutable reference to the element at the given handle.
    pub fn get_mut(&mut self, handle: &Handle<T>) -> Option<&mut T> {
        if self.contains(handle) {
            self.data[handle.index()].as_mut()
        } else {
            None
        }
    }

    /// Returns the handles of all live elements in slot order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_some())
            .map(|(index, _)| Handle::new(index, self.generations[index]))
            .collect()
    }

    /// Iterates over all live elements together with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(index, value)| value.as_ref().map(|value| (Handle::new(index, self.generations[index]), value)))
    }

    /// Returns the number of elements in the container.
    pub fn len(&self) -> usize {
        self.data.len() - self.free_list.len()
    }

    /// Returns `true` if the container holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots that can be reused without growing the container.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Removes every element. Outstanding handles become invalid.
    pub fn clear(&mut self) {
        for index in 0..self.data.len() {
            if self.data[index].take().is_some() {
                self.generations[index] += 1;
                self.free_list.push_back(index);
            }
        }
    }
}
