//! In-memory document state: the ordered slides and their text blocks.
//!
//! The store is the single owner of slide content. Every element gets an
//! [`ElementHandle`] when it first enters the store; the handle stays stable
//! across updates and is what the UI layer keys its widgets on, so nothing
//! downstream needs to look elements up by their string id.

use std::collections::HashMap;

use crate::model::{Slide, TextBlock};

/// Opaque reference to a rendered element, allocated by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(ElementHandle),
    Replaced(ElementHandle),
}

impl Upsert {
    pub fn handle(self) -> ElementHandle {
        match self {
            Upsert::Inserted(h) | Upsert::Replaced(h) => h,
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    slides: Vec<Slide>,
    current_slide_index: usize,
    handles: HashMap<String, ElementHandle>,
    next_handle: u64,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slides(slides: Vec<Slide>) -> Self {
        let mut store = Self::new();
        store.replace_slides(slides);
        store
    }

    // ─── Slide navigation ──────────────────────────────────────────

    pub fn current_slide_index(&self) -> usize {
        self.current_slide_index
    }

    /// Returns `false` (and changes nothing) when `index` is out of range.
    pub fn set_current_slide_index(&mut self, index: usize) -> bool {
        if index >= self.slides.len() {
            return false;
        }
        self.current_slide_index = index;
        true
    }

    pub fn slide(&self, index: usize) -> Option<&Slide> {
        self.slides.get(index)
    }

    pub fn current_slide(&self) -> Option<&Slide> {
        self.slides.get(self.current_slide_index)
    }

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    // ─── Text block mutation ───────────────────────────────────────

    /// Append `block` to a slide. An id already present on that slide is
    /// replaced in place so ids stay unique.
    pub fn add_text_block_to_slide(&mut self, slide_index: usize, block: TextBlock) -> Option<ElementHandle> {
        if self.slide_contains(slide_index, &block.id) {
            return self
                .update_text_block_in_slide(slide_index, &block.id.clone(), block)
                .map(Upsert::handle);
        }
        let slide = self.slides.get_mut(slide_index)?;
        let handle = Self::handle_for(&mut self.handles, &mut self.next_handle, &block.id);
        slide.content.push(block);
        Some(handle)
    }

    /// Replace the block with `id` on the slide, or append it if absent.
    pub fn update_text_block_in_slide(&mut self, slide_index: usize, id: &str, block: TextBlock) -> Option<Upsert> {
        let slide = self.slides.get_mut(slide_index)?;
        let handle = Self::handle_for(&mut self.handles, &mut self.next_handle, &block.id);
        match slide.content.iter().position(|b| b.id == id) {
            Some(pos) => {
                if block.id != id {
                    self.handles.remove(id);
                }
                slide.content[pos] = block;
                Some(Upsert::Replaced(handle))
            }
            None => {
                slide.content.push(block);
                Some(Upsert::Inserted(handle))
            }
        }
    }

    /// Remove a block. Removing an absent block returns `None`.
    pub fn remove_text_block_from_slide(&mut self, slide_index: usize, id: &str) -> Option<(TextBlock, ElementHandle)> {
        let slide = self.slides.get_mut(slide_index)?;
        let pos = slide.content.iter().position(|b| b.id == id)?;
        let block = slide.content.remove(pos);
        let handle = self.handles.remove(id)?;
        Some((block, handle))
    }

    /// Locate a block on any slide.
    pub fn find_text_block(&self, id: &str) -> Option<(usize, &TextBlock)> {
        self.slides.iter().enumerate().find_map(|(index, slide)| {
            slide.content.iter().find(|b| b.id == id).map(|b| (index, b))
        })
    }

    pub fn handle(&self, id: &str) -> Option<ElementHandle> {
        self.handles.get(id).copied()
    }

    // ─── Slide mutation ────────────────────────────────────────────

    pub fn add_slide(&mut self, slide: Slide) -> usize {
        for block in &slide.content {
            Self::handle_for(&mut self.handles, &mut self.next_handle, &block.id);
        }
        self.slides.push(slide);
        self.slides.len() - 1
    }

    /// Remove a slide, clamping the current index to the last remaining slide.
    pub fn remove_slide(&mut self, index: usize) -> Option<Slide> {
        if index >= self.slides.len() {
            return None;
        }
        let slide = self.slides.remove(index);
        for block in &slide.content {
            self.handles.remove(&block.id);
        }
        if self.current_slide_index >= self.slides.len() {
            self.current_slide_index = self.slides.len().saturating_sub(1);
        }
        Some(slide)
    }

    /// Replace a slide's whole content. Handles survive for ids that remain.
    pub fn replace_slide_content(&mut self, index: usize, content: Vec<TextBlock>) -> bool {
        let Some(slide) = self.slides.get_mut(index) else {
            return false;
        };
        let old = std::mem::replace(&mut slide.content, content);
        for block in old {
            if !self.slides[index].content.iter().any(|b| b.id == block.id) {
                self.handles.remove(&block.id);
            }
        }
        for block in &self.slides[index].content {
            Self::handle_for(&mut self.handles, &mut self.next_handle, &block.id);
        }
        true
    }

    /// Replace every slide (full resync). Handles survive for ids that remain.
    pub fn replace_slides(&mut self, slides: Vec<Slide>) {
        let mut handles = HashMap::new();
        for block in slides.iter().flat_map(|s| s.content.iter()) {
            let handle = match self.handles.get(&block.id) {
                Some(existing) => *existing,
                None => {
                    self.next_handle += 1;
                    ElementHandle(self.next_handle)
                }
            };
            handles.insert(block.id.clone(), handle);
        }
        self.handles = handles;
        self.slides = slides;
        if self.current_slide_index >= self.slides.len() {
            self.current_slide_index = self.slides.len().saturating_sub(1);
        }
    }

    fn slide_contains(&self, slide_index: usize, id: &str) -> bool {
        self.slides
            .get(slide_index)
            .is_some_and(|s| s.content.iter().any(|b| b.id == id))
    }

    fn handle_for(handles: &mut HashMap<String, ElementHandle>, next: &mut u64, id: &str) -> ElementHandle {
        *handles.entry(id.to_string()).or_insert_with(|| {
            *next += 1;
            ElementHandle(*next)
        })
    }
}
