use std::collections::HashMap;

use crate::app::{App, AppId, QuirkSet};

/// An ordered collection of application records, deduplicated by id.
///
/// Adding a record whose id is already present merges the two records instead
/// of producing a duplicate entry, so the size always equals the number of
/// distinct ids added. Not thread-safe by itself; the loader gives each
/// fan-out worker its own list and merges after the join.
#[derive(Debug, Default)]
pub struct AppList {
    apps: Vec<App>,
    index: HashMap<AppId, usize>,
}

impl AppList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `app`, or merge it into the existing record with the same id.
    /// The existing record's fields take precedence (first writer wins).
    pub fn add(&mut self, app: App) {
        match self.index.get(app.id()) {
            Some(&pos) => self.apps[pos].merge(&app),
            None => {
                self.index.insert(app.id().clone(), self.apps.len());
                self.apps.push(app);
            }
        }
    }

    /// `add` every element of `other`, preserving first-seen order.
    pub fn merge(&mut self, other: AppList) {
        for app in other.apps {
            self.add(app);
        }
    }

    pub fn lookup(&self, id: &AppId) -> Option<&App> {
        self.index.get(id).map(|&pos| &self.apps[pos])
    }

    pub fn contains(&self, id: &AppId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &App> {
        self.apps.iter()
    }

    /// Drop every record matching `pred`, keeping relative order.
    pub fn retain(&mut self, pred: impl Fn(&App) -> bool) {
        self.apps.retain(|app| pred(app));
        self.index.clear();
        for (pos, app) in self.apps.iter().enumerate() {
            self.index.insert(app.id().clone(), pos);
        }
    }

    /// Records still carrying the wildcard quirk.
    pub fn wildcards(&self) -> Vec<App> {
        self.apps
            .iter()
            .filter(|app| app.has_quirk(QuirkSet::IS_WILDCARD))
            .cloned()
            .collect()
    }

    pub fn to_vec(&self) -> Vec<App> {
        self.apps.clone()
    }
}

impl FromIterator<App> for AppList {
    fn from_iter<T: IntoIterator<Item = App>>(iter: T) -> Self {
        let mut list = AppList::new();
        for app in iter {
            list.add(app);
        }
        list
    }
}

impl<'a> IntoIterator for &'a AppList {
    type Item = &'a App;
    type IntoIter = std::slice::Iter<'a, App>;

    fn into_iter(self) -> Self::IntoIter {
        self.apps.iter()
    }
}
