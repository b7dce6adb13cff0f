//! Script value types as reconstructed by the analysis passes.
//!
//! The bytecode carries almost no type information: scalar types are visible on `RSADD`,
//! `CONST` and operator type bytes, everything else (parameters, return values, struct
//! shapes) is inferred. [`Type::Unresolved`] marks a slot whose type has not been observed
//! yet and [`Type::refine`] folds new evidence into an existing type.

use std::fmt;

use crate::disassembler::TypeCode;

/// A script type.
///
/// Every type occupies a fixed number of 4-byte stack slots, see [`Type::size`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value (subroutine return only)
    Void,
    /// 32-bit integer
    Int,
    /// 32-bit float
    Float,
    /// String handle
    String,
    /// Object identifier
    Object,
    /// Three floats; used by action declarations, inferred vectors are `Struct` values
    /// for which [`StructType::is_vector`] holds
    Vector,
    /// Deferred action; occupies no stack slot
    Action,
    /// Engine structure 0
    Effect,
    /// Engine structure 1
    Event,
    /// Engine structure 2
    Location,
    /// Engine structure 3
    Talent,
    /// Structure of consecutive slots
    Struct(StructType),
    /// One slot whose type is not known yet
    Unresolved,
}

/// Ordered member list of a structure.
///
/// Identity is structural: two structures with the same member sequence are the same type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StructType {
    /// Members in memory order (lowest stack address first)
    pub members: Vec<Type>,
}

impl StructType {
    /// Creates a structure from its members.
    #[must_use]
    pub fn new(members: Vec<Type>) -> Self {
        StructType { members }
    }

    /// The 3-float structure used for vectors.
    #[must_use]
    pub fn vector() -> Self {
        StructType {
            members: vec![Type::Float, Type::Float, Type::Float],
        }
    }

    /// Returns `true` for exactly three float members.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        self.members.len() == 3 && self.members.iter().all(|m| *m == Type::Float)
    }

    /// Total size in slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.members.iter().map(Type::size).sum()
    }

    /// Finds the member covering `slot` (relative to the struct start).
    ///
    /// Returns the member index and the slot offset of that member.
    #[must_use]
    pub fn member_at(&self, slot: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (index, member) in self.members.iter().enumerate() {
            let size = member.size();
            if slot < start + size {
                return Some((index, start));
            }
            start += size;
        }
        None
    }
}

impl Type {
    /// Size in 4-byte stack slots.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Type::Void | Type::Action => 0,
            Type::Vector => 3,
            Type::Struct(s) => s.size(),
            _ => 1,
        }
    }

    /// The scalar type named by a single-type byte (`RSADD`, `CONST`).
    #[must_use]
    pub fn from_type_code(code: TypeCode) -> Option<Type> {
        Some(match code {
            TypeCode::Int => Type::Int,
            TypeCode::Float => Type::Float,
            TypeCode::String => Type::String,
            TypeCode::Object => Type::Object,
            TypeCode::Effect => Type::Effect,
            TypeCode::Event => Type::Event,
            TypeCode::Location => Type::Location,
            TypeCode::Talent => Type::Talent,
            _ => return None,
        })
    }

    /// Parses a declaration keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Type> {
        Some(match keyword {
            "void" => Type::Void,
            "int" => Type::Int,
            "float" => Type::Float,
            "string" => Type::String,
            "object" => Type::Object,
            "vector" => Type::Vector,
            "action" => Type::Action,
            "effect" => Type::Effect,
            "event" => Type::Event,
            "location" => Type::Location,
            "talent" => Type::Talent,
            _ => return None,
        })
    }

    /// Normalizes [`Type::Vector`] into its 3-float structure.
    #[must_use]
    pub fn normalized(self) -> Type {
        match self {
            Type::Vector => Type::Struct(StructType::vector()),
            Type::Struct(s) => Type::Struct(StructType::new(
                s.members.into_iter().map(Type::normalized).collect(),
            )),
            other => other,
        }
    }

    /// Returns `true` if this is a vector, either declared or inferred.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        match self {
            Type::Vector => true,
            Type::Struct(s) => s.is_vector(),
            _ => false,
        }
    }

    /// Returns `true` if no part of the type is unresolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        match self {
            Type::Unresolved => false,
            Type::Struct(s) => s.members.iter().all(Type::is_resolved),
            _ => true,
        }
    }

    /// Folds evidence into this type.
    ///
    /// Unresolved slots take the evidence type and structures refine slot by slot. Grouping
    /// is never changed here, see [`group_slots`]. Returns `true` if anything changed.
    /// Conflicting concrete types keep the existing type.
    pub fn refine(&mut self, evidence: &Type) -> bool {
        let evidence = evidence.clone().normalized();
        if self.size() != evidence.size() {
            return false;
        }

        if *self == Type::Unresolved {
            if evidence == Type::Unresolved {
                return false;
            }
            *self = evidence;
            return true;
        }

        if let Type::Struct(mine) = self {
            let mut layout = flatten_slots(mine);
            let theirs = match &evidence {
                Type::Struct(theirs) => flatten_slots(theirs),
                other => vec![other.clone()],
            };
            let mut changed = false;
            for (slot, their) in layout.iter_mut().zip(theirs.iter()) {
                if *slot == Type::Unresolved && *their != Type::Unresolved {
                    *slot = their.clone();
                    changed = true;
                }
            }
            if changed {
                let rebuilt = rebuild_like(mine, &mut layout.into_iter());
                *mine = rebuilt;
            }
            return changed;
        }

        false
    }

    /// Folds evidence into the slots starting at `start`.
    ///
    /// Same as [`Type::refine`] but for evidence about a part of a structure.
    pub fn refine_slots(&mut self, start: usize, evidence: &Type) -> bool {
        if start == 0 && self.size() == evidence.size() {
            return self.refine(evidence);
        }
        let Type::Struct(mine) = self else {
            return false;
        };

        let theirs = match evidence.clone().normalized() {
            Type::Struct(theirs) => flatten_slots(&theirs),
            other => vec![other],
        };
        let mut layout = flatten_slots(mine);
        if start + theirs.len() > layout.len() {
            return false;
        }

        let mut changed = false;
        for (slot, their) in layout[start..].iter_mut().zip(theirs) {
            if *slot == Type::Unresolved && their != Type::Unresolved {
                *slot = their;
                changed = true;
            }
        }
        if changed {
            let rebuilt = rebuild_like(mine, &mut layout.into_iter());
            *mine = rebuilt;
        }
        changed
    }

    /// Selects the slots `[start, start + count)` of this type.
    ///
    /// Returns the member index path to the (possibly nested) member covering exactly that
    /// range together with the member type. The whole type has an empty path.
    #[must_use]
    pub fn member_path(&self, start: usize, count: usize) -> Option<(Vec<usize>, Type)> {
        if start == 0 && count == self.size() {
            return Some((Vec::new(), self.clone()));
        }
        let Type::Struct(s) = self else {
            return None;
        };
        let (index, member_start) = s.member_at(start)?;
        let (mut path, ty) = s.members[index].member_path(start - member_start, count)?;
        path.insert(0, index);
        Some((path, ty))
    }
}

/// Flattens a structure into its scalar slot types.
fn flatten_slots(structure: &StructType) -> Vec<Type> {
    let mut out = Vec::with_capacity(structure.size());
    for member in &structure.members {
        match member {
            Type::Struct(inner) => out.extend(flatten_slots(inner)),
            other => out.push(other.clone()),
        }
    }
    out
}

/// Rebuilds `shape` with scalar slots taken from `slots`.
fn rebuild_like(shape: &StructType, slots: &mut impl Iterator<Item = Type>) -> StructType {
    StructType::new(
        shape
            .members
            .iter()
            .map(|member| match member {
                Type::Struct(inner) => Type::Struct(rebuild_like(inner, slots)),
                other => slots.next().unwrap_or_else(|| other.clone()),
            })
            .collect(),
    )
}

/// Groups the slots `[start, start + count)` of a slot layout into one structure.
///
/// `layout` is a run of consecutive entries in memory order. The span must align with
/// entry boundaries, or lie inside a single structure entry, in which case the grouping
/// nests into that structure. Returns `false` if the span is misaligned; returns `true`
/// (without change) if the span already is a single entry.
pub fn group_slots(layout: &mut Vec<Type>, start: usize, count: usize) -> bool {
    if count == 0 {
        return false;
    }

    let mut first = None;
    let mut last = None;
    let mut slot = 0;
    for (index, entry) in layout.iter().enumerate() {
        let size = entry.size();
        if first.is_none() && start >= slot && start < slot + size.max(1) {
            first = Some((index, slot));
        }
        if start + count > slot && start + count <= slot + size {
            last = Some((index, slot + size));
            break;
        }
        slot += size;
    }

    let (Some((first, first_start)), Some((last, last_end))) = (first, last) else {
        return false;
    };

    if first == last {
        if first_start == start && last_end == start + count {
            return true;
        }
        return match &mut layout[first] {
            Type::Struct(inner) => {
                let mut members = std::mem::take(&mut inner.members);
                let grouped = group_slots(&mut members, start - first_start, count);
                inner.members = members;
                grouped
            }
            _ => false,
        };
    }

    if first_start != start || last_end != start + count {
        return false;
    }

    let members: Vec<Type> = layout.drain(first..=last).collect();
    layout.insert(first, Type::Struct(StructType::new(members)));
    true
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int | Type::Unresolved => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Object => write!(f, "object"),
            Type::Vector => write!(f, "vector"),
            Type::Action => write!(f, "action"),
            Type::Effect => write!(f, "effect"),
            Type::Event => write!(f, "event"),
            Type::Location => write!(f, "location"),
            Type::Talent => write!(f, "talent"),
            Type::Struct(s) if s.is_vector() => write!(f, "vector"),
            Type::Struct(s) => {
                write!(f, "struct{{")?;
                for (i, member) in s.members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
