//! Field extraction and the batch memory view (spec §4.D), grounded on
//! `elf/base/extractor.h`.
//!
//! The C++ original binds named fields to a game state type via RTTI
//! (`typeid`) lookups into a nightly-only registry. The redesign flag in the
//! design notes replaces that with a [`std::any::TypeId`]-keyed registry of
//! trait objects (see [`ExtractorRegistry`]) — no nightly features, same
//! shape: one [`Extractor<S>`] per concrete state type `S`, looked up
//! dynamically by whichever thread is producing or consuming that state.

use std::any::{Any, TypeId};

use hashbrown::HashMap;

/// A bounds-checked, stride-aware view over one field's raw backing bytes
/// for an entire batch. Every slot is `elem_size` bytes; `write`/`read`
/// reinterpret slot `index` as `T`, trapping (by panic) on a size mismatch
/// or an out-of-range index — both are protocol violations, not recoverable
/// conditions.
pub struct AnyP<'a> {
    bytes: &'a mut [u8],
    elem_size: usize,
}

impl<'a> AnyP<'a> {
    pub fn new(bytes: &'a mut [u8], elem_size: usize) -> AnyP<'a> {
        assert!(elem_size > 0, "AnyP: elem_size must be non-zero");
        assert_eq!(bytes.len() % elem_size, 0, "AnyP: buffer length is not a multiple of elem_size");
        AnyP { bytes, elem_size }
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len() / self.elem_size
    }

    fn slot_range(&self, index: usize) -> std::ops::Range<usize> {
        let start = index * self.elem_size;
        let end = start + self.elem_size;
        assert!(end <= self.bytes.len(), "AnyP: index {} out of bounds for {} slots", index, self.capacity());
        start..end
    }

    pub fn write<T: Copy>(&mut self, index: usize, value: T) {
        assert_eq!(std::mem::size_of::<T>(), self.elem_size, "AnyP: write type size does not match registered stride");
        let range = self.slot_range(index);
        let dst = &mut self.bytes[range];
        unsafe {
            std::ptr::copy_nonoverlapping((&value as *const T).cast::<u8>(), dst.as_mut_ptr(), self.elem_size);
        }
    }

    pub fn read<T: Copy>(&self, index: usize) -> T {
        assert_eq!(std::mem::size_of::<T>(), self.elem_size, "AnyP: read type size does not match registered stride");
        let range = self.slot_range(index);
        let src = &self.bytes[range];
        unsafe {
            let mut out = std::mem::MaybeUninit::<T>::uninit();
            std::ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr().cast::<u8>(), self.elem_size);
            out.assume_init()
        }
    }
}

type ExtractFn<S> = Box<dyn Fn(&S, &mut AnyP, usize) + Send + Sync>;
type FillFn<S> = Box<dyn Fn(&AnyP, usize, &mut S) + Send + Sync>;

struct Field<S> {
    elem_size: usize,
    extract: ExtractFn<S>,
    fill: FillFn<S>,
}

/// Binds named fields of state type `S` to closures that push a field's
/// value into a batch slot (`extract`) or pull it back out (`fill`, used
/// for e.g. action fields the consumer writes and the producer reads back).
pub struct Extractor<S> {
    fields: HashMap<String, Field<S>>,
}

impl<S> Extractor<S> {
    pub fn new() -> Extractor<S> {
        Extractor { fields: HashMap::new() }
    }

    /// Register a field of transfer type `T` (any `Copy` POD type - the
    /// integers/floats that make up observation and action tensors).
    pub fn add_field<T>(
        &mut self,
        name: impl Into<String>,
        extract: impl Fn(&S) -> T + Send + Sync + 'static,
        fill: impl Fn(&mut S, T) + Send + Sync + 'static,
    ) where
        T: Copy + Send + Sync + 'static,
    {
        let elem_size = std::mem::size_of::<T>();
        self.fields.insert(
            name.into(),
            Field {
                elem_size,
                extract: Box::new(move |s, anyp, idx| anyp.write(idx, extract(s))),
                fill: Box::new(move |anyp, idx, s| fill(s, anyp.read(idx))),
            },
        );
    }

    pub fn elem_size(&self, name: &str) -> usize {
        self.fields.get(name).unwrap_or_else(|| panic!("extractor: unknown field {:?}", name)).elem_size
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }

    /// Push `state`'s value for `name` into batch slot `index` of `anyp`.
    pub fn extract(&self, name: &str, state: &S, anyp: &mut AnyP, index: usize) {
        let field = self.fields.get(name).unwrap_or_else(|| panic!("extractor: unknown field {:?}", name));
        (field.extract)(state, anyp, index);
    }

    /// Pull batch slot `index` of `anyp` back into `state`'s field `name`.
    pub fn fill(&self, name: &str, anyp: &AnyP, index: usize, state: &mut S) {
        let field = self.fields.get(name).unwrap_or_else(|| panic!("extractor: unknown field {:?}", name));
        (field.fill)(anyp, index, state);
    }
}

impl<S> Default for Extractor<S> {
    fn default() -> Self {
        Extractor::new()
    }
}

/// A registry of [`Extractor<S>`] values keyed by the `TypeId` of `S`,
/// letting a single collector or dispatcher serve several distinct game
/// state types without knowing their concrete types ahead of time.
#[derive(Default)]
pub struct ExtractorRegistry {
    by_type: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ExtractorRegistry {
    pub fn new() -> ExtractorRegistry {
        ExtractorRegistry { by_type: HashMap::new() }
    }

    pub fn register<S: 'static>(&mut self, extractor: Extractor<S>) {
        self.by_type.insert(TypeId::of::<S>(), Box::new(extractor));
    }

    pub fn get<S: 'static>(&self) -> Option<&Extractor<S>> {
        self.by_type.get(&TypeId::of::<S>()).and_then(|b| b.downcast_ref::<Extractor<S>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyp_write_read_roundtrip() {
        let mut buf = vec![0u8; std::mem::size_of::<f32>() * 4];
        let mut anyp = AnyP::new(&mut buf, std::mem::size_of::<f32>());
        anyp.write(0, 1.5f32);
        anyp.write(3, -2.5f32);
        assert_eq!(anyp.read::<f32>(0), 1.5);
        assert_eq!(anyp.read::<f32>(3), -2.5);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn anyp_out_of_bounds_panics() {
        let mut buf = vec![0u8; 4];
        let mut anyp = AnyP::new(&mut buf, 4);
        anyp.write(1, 1i32);
    }

    #[test]
    #[should_panic(expected = "does not match registered stride")]
    fn anyp_type_mismatch_panics() {
        let mut buf = vec![0u8; 8];
        let mut anyp = AnyP::new(&mut buf, 4);
        anyp.write(0, 1.0f64);
    }

    struct Toy {
        x: i32,
        action: i32,
    }

    #[test]
    fn extractor_extract_and_fill() {
        let mut ext: Extractor<Toy> = Extractor::new();
        ext.add_field("x", |t: &Toy| t.x, |t: &mut Toy, v: i32| t.x = v);
        ext.add_field("action", |t: &Toy| t.action, |t: &mut Toy, v: i32| t.action = v);

        let mut buf = vec![0u8; std::mem::size_of::<i32>() * 2];
        let mut anyp = AnyP::new(&mut buf, std::mem::size_of::<i32>());

        let toy = Toy { x: 7, action: 0 };
        ext.extract("x", &toy, &mut anyp, 0);
        assert_eq!(anyp.read::<i32>(0), 7);

        let mut anyp2 = AnyP::new(&mut buf, std::mem::size_of::<i32>());
        anyp2.write(1, 99i32);
        let mut toy2 = Toy { x: 0, action: 0 };
        ext.fill("action", &anyp2, 1, &mut toy2);
        assert_eq!(toy2.action, 99);
    }

    struct OtherState(f32);

    #[test]
    fn registry_dispatches_by_type() {
        let mut registry = ExtractorRegistry::new();

        let mut toy_ext: Extractor<Toy> = Extractor::new();
        toy_ext.add_field("x", |t: &Toy| t.x, |t: &mut Toy, v: i32| t.x = v);
        registry.register(toy_ext);

        let mut other_ext: Extractor<OtherState> = Extractor::new();
        other_ext.add_field("0", |s: &OtherState| s.0, |s: &mut OtherState, v: f32| s.0 = v);
        registry.register(other_ext);

        assert!(registry.get::<Toy>().is_some());
        assert!(registry.get::<OtherState>().is_some());
        assert_eq!(registry.get::<Toy>().unwrap().elem_size("x"), std::mem::size_of::<i32>());
    }
}
