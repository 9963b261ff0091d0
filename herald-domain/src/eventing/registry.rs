//! 处理器注册表（HandlerRegistry）
//!
//! 将事件类型映射到有序处理器列表：
//! - 指定类型的处理器按类型索引；
//! - 未指定类型（或包含通配 `*`）的处理器作为全局处理器，逐事件询问是否接受；
//! - `resolve` 先返回指定类型处理器，再返回接受该事件的全局处理器，组内保持注册顺序；
//! - 同步与并发处理器分桶存放，总线只会取到与其执行模型兼容的处理器。
//!
//! 内部以 `RwLock` 同步，注册/注销可与解析并发进行。
//!
use super::handler::{ExecutionMode, HandledEventType, RegisteredHandler};
use crate::domain_event::Event;
use crate::error::{DomainError, DomainResult};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone)]
struct Entry {
    seq: u64,
    handler: RegisteredHandler,
}

#[derive(Default)]
struct Bucket {
    specific: HashMap<String, Vec<Entry>>,
    global: Vec<Entry>,
}

impl Bucket {
    /// 指定类型条目与接受该事件的全局条目，各自按注册顺序
    fn matching(&self, event: &Event) -> (Vec<&Entry>, Vec<&Entry>) {
        let specific = self
            .specific
            .get(event.event_type())
            .map(|list| list.iter().collect())
            .unwrap_or_default();
        let global = self
            .global
            .iter()
            .filter(|e| e.handler.can_handle(event))
            .collect();
        (specific, global)
    }

    fn resolve(&self, event: &Event) -> Vec<RegisteredHandler> {
        let (specific, global) = self.matching(event);
        ordered(specific, global)
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&str, &Entry) -> bool) -> usize {
        let mut removed = 0;
        self.specific.retain(|event_type, list| {
            let before = list.len();
            list.retain(|e| !pred(event_type.as_str(), e));
            removed += before - list.len();
            !list.is_empty()
        });

        let before = self.global.len();
        self.global.retain(|e| !pred(super::handler::WILDCARD, e));
        removed + before - self.global.len()
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.specific.values().flatten().chain(self.global.iter())
    }
}

fn ordered(mut specific: Vec<&Entry>, mut global: Vec<&Entry>) -> Vec<RegisteredHandler> {
    specific.sort_by_key(|e| e.seq);
    global.sort_by_key(|e| e.seq);
    specific
        .into_iter()
        .chain(global)
        .map(|e| e.handler.clone())
        .collect()
}

#[derive(Default)]
struct RegistryInner {
    sync: Bucket,
    concurrent: Bucket,
    next_seq: u64,
}

impl RegistryInner {
    fn bucket_mut(&mut self, mode: ExecutionMode) -> &mut Bucket {
        match mode {
            ExecutionMode::Sync => &mut self.sync,
            ExecutionMode::Concurrent => &mut self.concurrent,
        }
    }

    fn bucket(&self, mode: ExecutionMode) -> &Bucket {
        match mode {
            ExecutionMode::Sync => &self.sync,
            ExecutionMode::Concurrent => &self.concurrent,
        }
    }
}

/// 处理器注册表
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<RegistryInner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, RegistryInner>> {
        self.inner
            .read()
            .map_err(|_| DomainError::event_bus("handler registry lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, RegistryInner>> {
        self.inner
            .write()
            .map_err(|_| DomainError::event_bus("handler registry lock poisoned"))
    }

    /// 注册处理器
    ///
    /// `event_types` 为 `None` 时使用处理器声明的类型；声明为全部或包含 `*` 时作为全局处理器。
    pub fn register(
        &self,
        handler: RegisteredHandler,
        event_types: Option<Vec<String>>,
    ) -> DomainResult<()> {
        let handled = match event_types {
            Some(types) => HandledEventType::from_types(types),
            None => handler.handled_event_type(),
        };

        let mut inner = self.write()?;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let entry = Entry { seq, handler };
        let bucket = inner.bucket_mut(entry.handler.mode());
        match handled {
            HandledEventType::All => bucket.global.push(entry),
            HandledEventType::One(t) => bucket.specific.entry(t).or_default().push(entry),
            HandledEventType::Many(ts) => {
                for t in ts {
                    let list = bucket.specific.entry(t).or_default();
                    if !list.iter().any(|e| e.seq == seq) {
                        list.push(entry.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// 按名称注销处理器（所有类型、所有执行模式），返回移除的条目数
    pub fn unregister(&self, handler_name: &str) -> DomainResult<usize> {
        let mut inner = self.write()?;
        let by_name = |_: &str, e: &Entry| e.handler.handler_name() == handler_name;
        Ok(inner.sync.remove_where(by_name) + inner.concurrent.remove_where(by_name))
    }

    /// 仅注销某事件类型下的指定处理器
    pub fn unregister_for(&self, event_type: &str, handler_name: &str) -> DomainResult<usize> {
        let mut inner = self.write()?;
        let matches =
            |t: &str, e: &Entry| t == event_type && e.handler.handler_name() == handler_name;
        Ok(inner.sync.remove_where(matches) + inner.concurrent.remove_where(matches))
    }

    /// 解析给定执行模式下应处理该事件的处理器（有序）
    pub fn resolve_mode(
        &self,
        event: &Event,
        mode: ExecutionMode,
    ) -> DomainResult<Vec<RegisteredHandler>> {
        Ok(self.read()?.bucket(mode).resolve(event))
    }

    /// 解析全部执行模式下的处理器
    ///
    /// 两个桶的指定类型处理器合并后在前，全局处理器在后，组内按注册顺序。
    pub fn resolve(&self, event: &Event) -> DomainResult<Vec<RegisteredHandler>> {
        let inner = self.read()?;
        let (mut specific, mut global) = inner.sync.matching(event);
        let (more_specific, more_global) = inner.concurrent.matching(event);
        specific.extend(more_specific);
        global.extend(more_global);
        Ok(ordered(specific, global))
    }

    /// 按名称查找处理器（死信重试时定位原处理器）
    pub fn find(&self, handler_name: &str) -> Option<RegisteredHandler> {
        let inner = self.read().ok()?;
        inner
            .sync
            .entries()
            .chain(inner.concurrent.entries())
            .find(|e| e.handler.handler_name() == handler_name)
            .map(|e| e.handler.clone())
    }

    /// 已注册处理器名称（按注册顺序去重）
    pub fn handler_names(&self) -> Vec<String> {
        let Ok(inner) = self.read() else {
            return Vec::new();
        };

        let mut entries: Vec<&Entry> = inner
            .sync
            .entries()
            .chain(inner.concurrent.entries())
            .collect();
        entries.sort_by_key(|e| e.seq);

        let mut names: Vec<String> = Vec::new();
        for e in entries {
            let name = e.handler.handler_name();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// 注册条目总数（多类型处理器按类型计数）
    pub fn len(&self) -> usize {
        self.read()
            .map(|inner| inner.sync.entries().count() + inner.concurrent.entries().count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
