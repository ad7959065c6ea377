use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::media::asset::Asset;
use crate::media::remote::PageInfo;
use crate::media::service::{MediaPage, UploadFile};

/// Quiet period coalescing free-text query keystrokes into one fetch.
pub const QUERY_DEBOUNCE: Duration = Duration::from_millis(350);
/// Delay before the authoritative refresh after an upload, covering the
/// lag of the platform's file index behind the just-completed write.
pub const POST_UPLOAD_REFRESH: Duration = Duration::from_millis(1200);
pub const DEFAULT_PAGE_SIZE: u32 = 60;

/// Initial selection as the embedding form hands it over: bare ids or
/// already-normalized records.
#[derive(Debug, Clone)]
pub enum SelectionInit {
    Id(String),
    Record(Asset),
}

/// The confirm payload emitted to the embedding form.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub hero_id: Option<String>,
    pub gallery_ids: Vec<String>,
    pub nodes: Vec<Asset>,
}

#[derive(Debug, Clone)]
pub enum PickerEvent {
    Opened,
    Closed,
    QueryChanged(String),
    DebounceElapsed,
    PageSizeChanged(u32),
    Refresh,
    NextPage,
    PrevPage,
    ListLoaded { generation: u64, page: MediaPage },
    ListFailed { generation: u64, message: String },
    UploadRequested(Vec<UploadFile>),
    UploadSucceeded(Vec<Asset>),
    UploadFailed(String),
    RefreshDue,
    ToggleSelect(String),
    SetHero(String),
    MoveUp(usize),
    MoveDown(usize),
    RemoveSelected(String),
    Confirm,
}

/// Work the host runtime performs on the controller's behalf: remote calls
/// through the media endpoints, and timers fed back as events.
#[derive(Debug, Clone, PartialEq)]
pub enum PickerEffect {
    FetchList {
        generation: u64,
        first: u32,
        after: Option<String>,
    },
    StartUpload(Vec<UploadFile>),
    RestartDebounce(Duration),
    ScheduleRefresh(Duration),
    Confirmed(Selection),
    Close,
}

#[derive(Debug, Clone, PartialEq)]
struct PageCursor {
    after: Option<String>,
    page_num: u32,
}

/// Headless media picker controller. All state is owned by one instance;
/// `update` consumes an event and returns the effects the host should run.
/// Browsing requests are serialized by a single in-flight guard and tagged
/// with a generation so a late stale response can never clobber a newer
/// page. Uploads run independently of browsing fetches.
pub struct MediaPicker {
    multiple: bool,
    open: bool,
    query: String,
    debounced_query: String,
    page_size: u32,
    library: Vec<Asset>,
    // id -> record for everything ever selected, so confirm can emit nodes
    // that are no longer on the current page.
    known: HashMap<String, Asset>,
    selected_ids: Vec<String>,
    hero_id: Option<String>,
    page_info: PageInfo,
    page_stack: Vec<PageCursor>,
    in_flight: bool,
    loading_list: bool,
    uploading: bool,
    generation: u64,
    notice: Option<String>,
}

impl MediaPicker {
    pub fn new(multiple: bool, initial: Vec<SelectionInit>) -> Self {
        let mut known = HashMap::new();
        let mut selected_ids: Vec<String> = Vec::new();
        for item in initial {
            let id = match item {
                SelectionInit::Id(id) => id,
                SelectionInit::Record(asset) => {
                    let id = asset.id.clone();
                    known.insert(id.clone(), asset);
                    id
                }
            };
            if !id.is_empty() && !selected_ids.contains(&id) {
                selected_ids.push(id);
            }
        }
        let hero_id = selected_ids.first().cloned();

        Self {
            multiple,
            open: false,
            query: String::new(),
            debounced_query: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            library: Vec::new(),
            known,
            selected_ids,
            hero_id,
            page_info: PageInfo::default(),
            page_stack: vec![PageCursor {
                after: None,
                page_num: 1,
            }],
            in_flight: false,
            loading_list: false,
            uploading: false,
            generation: 0,
            notice: None,
        }
    }

    pub fn update(&mut self, event: PickerEvent) -> Vec<PickerEffect> {
        let effects = self.handle(event);
        self.check_selection_invariants();
        effects
    }

    fn handle(&mut self, event: PickerEvent) -> Vec<PickerEffect> {
        match event {
            PickerEvent::Opened => {
                self.open = true;
                self.reset_fetch()
            }
            PickerEvent::Closed => {
                self.open = false;
                Vec::new()
            }
            PickerEvent::QueryChanged(text) => {
                self.query = text;
                if self.open {
                    vec![PickerEffect::RestartDebounce(QUERY_DEBOUNCE)]
                } else {
                    Vec::new()
                }
            }
            PickerEvent::DebounceElapsed => {
                if self.query == self.debounced_query {
                    return Vec::new();
                }
                self.debounced_query = self.query.clone();
                if self.open { self.reset_fetch() } else { Vec::new() }
            }
            PickerEvent::PageSizeChanged(size) => {
                if size == self.page_size {
                    return Vec::new();
                }
                self.page_size = size;
                if self.open { self.reset_fetch() } else { Vec::new() }
            }
            PickerEvent::Refresh => {
                if self.open { self.reset_fetch() } else { Vec::new() }
            }
            PickerEvent::NextPage => {
                // Guard before touching the stack, so its top always names
                // the displayed page even when the fetch is refused.
                if self.in_flight || !self.page_info.has_next_page {
                    return Vec::new();
                }
                let Some(cursor) = self.page_info.end_cursor.clone() else {
                    return Vec::new();
                };
                let page_num = self.page_stack.len() as u32 + 1;
                self.page_stack.push(PageCursor {
                    after: Some(cursor.clone()),
                    page_num,
                });
                self.begin_fetch(Some(cursor))
            }
            PickerEvent::PrevPage => {
                if self.in_flight || self.page_stack.len() <= 1 {
                    return Vec::new();
                }
                self.page_stack.pop();
                let after = self
                    .page_stack
                    .last()
                    .and_then(|top| top.after.clone());
                self.begin_fetch(after)
            }
            PickerEvent::ListLoaded { generation, page } => {
                if generation != self.generation {
                    tracing::debug!(generation, current = self.generation, "discarding stale listing");
                    return Vec::new();
                }
                self.library = page.assets;
                self.page_info = page.page_info;
                self.loading_list = false;
                self.in_flight = false;
                self.notice = None;
                Vec::new()
            }
            PickerEvent::ListFailed { generation, message } => {
                if generation != self.generation {
                    return Vec::new();
                }
                // Prior library contents stay on screen.
                self.loading_list = false;
                self.in_flight = false;
                self.notice = Some(message);
                Vec::new()
            }
            PickerEvent::UploadRequested(files) => {
                if files.is_empty() || self.uploading {
                    return Vec::new();
                }
                self.uploading = true;
                vec![PickerEffect::StartUpload(files)]
            }
            PickerEvent::UploadSucceeded(assets) => {
                self.uploading = false;
                if !assets.is_empty() {
                    let mut ids: Vec<String> = Vec::with_capacity(assets.len());
                    for asset in &assets {
                        self.known.insert(asset.id.clone(), asset.clone());
                        if !self.selected_ids.contains(&asset.id) {
                            ids.push(asset.id.clone());
                        }
                    }
                    ids.extend(self.selected_ids.drain(..));
                    self.selected_ids = ids;
                    if self.hero_id.is_none() {
                        self.hero_id = assets.first().map(|a| a.id.clone());
                    }
                    // Show the new records immediately, ahead of the
                    // authoritative refresh.
                    self.library.splice(0..0, assets);
                    self.notice = None;
                }
                vec![PickerEffect::ScheduleRefresh(POST_UPLOAD_REFRESH)]
            }
            PickerEvent::UploadFailed(message) => {
                self.uploading = false;
                self.notice = Some(message);
                Vec::new()
            }
            PickerEvent::RefreshDue => {
                if self.open { self.reset_fetch() } else { Vec::new() }
            }
            PickerEvent::ToggleSelect(id) => {
                if let Some(asset) = self.library.iter().find(|a| a.id == id) {
                    self.known.insert(id.clone(), asset.clone());
                }
                if !self.multiple {
                    self.selected_ids = vec![id.clone()];
                    self.hero_id = Some(id);
                } else if let Some(pos) = self.selected_ids.iter().position(|s| *s == id) {
                    self.selected_ids.remove(pos);
                    if self.hero_id.as_deref() == Some(id.as_str()) {
                        self.hero_id = None;
                    }
                } else {
                    self.selected_ids.push(id);
                }
                Vec::new()
            }
            PickerEvent::SetHero(id) => {
                if self.selected_ids.contains(&id) {
                    self.hero_id = Some(id);
                }
                Vec::new()
            }
            PickerEvent::MoveUp(index) => {
                if index > 0 && index < self.selected_ids.len() {
                    self.selected_ids.swap(index, index - 1);
                }
                Vec::new()
            }
            PickerEvent::MoveDown(index) => {
                if index + 1 < self.selected_ids.len() {
                    self.selected_ids.swap(index, index + 1);
                }
                Vec::new()
            }
            PickerEvent::RemoveSelected(id) => {
                self.selected_ids.retain(|s| *s != id);
                if self.hero_id.as_deref() == Some(id.as_str()) {
                    self.hero_id = None;
                }
                Vec::new()
            }
            PickerEvent::Confirm => {
                if self.selected_ids.is_empty() {
                    return Vec::new();
                }
                let hero_id = self
                    .hero_id
                    .clone()
                    .filter(|hero| self.selected_ids.contains(hero))
                    .or_else(|| self.selected_ids.first().cloned());
                let nodes: Vec<Asset> = self
                    .selected_ids
                    .iter()
                    .filter_map(|id| self.known.get(id).cloned())
                    .collect();
                self.open = false;
                vec![
                    PickerEffect::Confirmed(Selection {
                        hero_id,
                        gallery_ids: self.selected_ids.clone(),
                        nodes,
                    }),
                    PickerEffect::Close,
                ]
            }
        }
    }

    /// Reset to page one and fetch, unless a request is already out.
    fn reset_fetch(&mut self) -> Vec<PickerEffect> {
        if self.in_flight {
            return Vec::new();
        }
        self.page_stack = vec![PageCursor {
            after: None,
            page_num: 1,
        }];
        self.begin_fetch(None)
    }

    fn begin_fetch(&mut self, after: Option<String>) -> Vec<PickerEffect> {
        self.in_flight = true;
        self.loading_list = true;
        self.generation += 1;
        vec![PickerEffect::FetchList {
            generation: self.generation,
            first: self.page_size,
            after,
        }]
    }

    fn check_selection_invariants(&self) {
        if let Some(hero) = &self.hero_id {
            debug_assert!(
                self.selected_ids.contains(hero),
                "hero must be a member of the selection"
            );
        }
        debug_assert_eq!(
            self.selected_ids.iter().collect::<HashSet<_>>().len(),
            self.selected_ids.len(),
            "selection must not contain duplicates"
        );
    }

    // --- Read accessors for the host view ---

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn library(&self) -> &[Asset] {
        &self.library
    }

    pub fn selected_ids(&self) -> &[String] {
        &self.selected_ids
    }

    pub fn hero_id(&self) -> Option<&str> {
        self.hero_id.as_deref()
    }

    pub fn page_num(&self) -> u32 {
        self.page_stack.last().map(|top| top.page_num).unwrap_or(1)
    }

    pub fn page_info(&self) -> &PageInfo {
        &self.page_info
    }

    pub fn is_loading(&self) -> bool {
        self.loading_list
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn can_confirm(&self) -> bool {
        !self.selected_ids.is_empty()
    }
}
