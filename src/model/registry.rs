//! `CubeRegistry`: the process-wide, read-only catalog of cube definitions.
//!
//! A registry is built once at startup and shared behind an `Arc` across
//! concurrent requests. Nothing in the planning or SQL-building pipeline
//! mutates a registry; `FilterCacheManager` and other per-request state live
//! alongside it, never inside it.

use std::collections::HashMap;

use super::cube::Cube;
use super::dimension::Dimension;
use super::measure::Measure;

/// A resolved reference to a member (`Cube.member`) split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub cube: &'a str,
    pub member: &'a str,
}

/// Split a `Cube.member` reference into its parts. References without a
/// dot are rejected: every member reference in a `SemanticQuery` must be
/// fully qualified.
pub fn split_member_ref(reference: &str) -> Option<MemberRef<'_>> {
    let (cube, member) = reference.split_once('.')?;
    if cube.is_empty() || member.is_empty() {
        return None;
    }
    Some(MemberRef { cube, member })
}

/// The catalog of cubes a query engine instance knows about.
#[derive(Debug, Default)]
pub struct CubeRegistry {
    cubes: HashMap<String, Cube>,
}

impl CubeRegistry {
    pub fn new() -> Self {
        Self {
            cubes: HashMap::new(),
        }
    }

    pub fn register(&mut self, cube: Cube) -> &mut Self {
        self.cubes.insert(cube.name.clone(), cube);
        self
    }

    pub fn cube(&self, name: &str) -> Option<&Cube> {
        self.cubes.get(name)
    }

    pub fn cubes(&self) -> impl Iterator<Item = &Cube> {
        self.cubes.values()
    }

    pub fn cube_names(&self) -> impl Iterator<Item = &str> {
        self.cubes.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cubes.contains_key(name)
    }

    pub fn measure(&self, cube: &str, name: &str) -> Option<&Measure> {
        self.cubes.get(cube)?.measures.get(name)
    }

    pub fn dimension(&self, cube: &str, name: &str) -> Option<&Dimension> {
        self.cubes.get(cube)?.dimensions.get(name)
    }

    /// Resolve a `Cube.member` reference to whichever of measure or
    /// dimension it names, if either exists.
    pub fn resolve_member(&self, reference: &str) -> Option<MemberKind<'_>> {
        let r = split_member_ref(reference)?;
        let cube = self.cubes.get(r.cube)?;
        if let Some(m) = cube.measures.get(r.member) {
            return Some(MemberKind::Measure(m));
        }
        if let Some(d) = cube.dimensions.get(r.member) {
            return Some(MemberKind::Dimension(d));
        }
        if cube.segments.contains_key(r.member) {
            return Some(MemberKind::Segment(r.member));
        }
        None
    }
}

/// What a resolved member reference turned out to be.
#[derive(Debug)]
pub enum MemberKind<'a> {
    Measure(&'a Measure),
    Dimension(&'a Dimension),
    Segment(&'a str),
}
