//! Runtime type tags and the conversion registry.
//!
//! Tags are printable, process-stable identifiers (`"i64"`, `"string"`,
//! `"seconds"`, …). A trailing `"&"` marks reference data; a leading
//! `"const "` marks const qualification. Unregistered types still flow
//! through the engine, they are just not convertible to anything else.

use crate::data::{DataBox, DataValue, SharedData, Value};
use crate::error::{FluxError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The tag every type converts to implicitly.
pub const ANY_TAG: &str = "any";

/// Strips a trailing `"&"` and a leading `"const "` from a tag.
pub fn strip_qualifiers(tag: &str) -> &str {
    let tag = tag.strip_prefix("const ").unwrap_or(tag);
    tag.strip_suffix('&').unwrap_or(tag)
}

/// Whether the tag names reference data.
pub fn is_reference(tag: &str) -> bool {
    tag.ends_with('&')
}

/// A registered conversion between two tagged types.
pub type ConversionFn = Arc<dyn Fn(&SharedData) -> Result<SharedData> + Send + Sync>;

/// Registry of known types and the conversions between them.
#[derive(Default)]
pub struct TypeRegistry {
    conversions: RwLock<HashMap<String, HashMap<String, Option<ConversionFn>>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw conversion entry. An explicit `None` records that the
    /// pair is known but unconvertible, which turns `convert` into an error
    /// for that pair.
    pub fn register_conversion(&self, from: &str, to: &str, converter: Option<ConversionFn>) {
        self.conversions
            .write()
            .unwrap()
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), converter);
    }

    /// Registers a one-way conversion between two typed values.
    ///
    /// When both sides carry the same tag, identity conversions are also
    /// installed across the reference and const-reference variants so that a
    /// `T` box can be handed to a `T&` port and back.
    pub fn register_unidirectional<F, T>(&self, convert: impl Fn(F) -> T + Send + Sync + 'static)
    where
        F: DataValue,
        T: DataValue,
    {
        let conversion: ConversionFn = Arc::new(move |data: &SharedData| {
            match data.get::<F>() {
                Some(value) => Ok(DataBox::new(convert(value))),
                // Boxes that do not actually hold a `F` pass through untouched.
                None => Ok(data.clone()),
            }
        });

        self.register_conversion(F::type_tag(), T::type_tag(), Some(conversion));

        if F::type_tag() == T::type_tag() {
            self.register_identity_variants(F::type_tag());
        }
    }

    /// Registers conversions in both directions between two typed values.
    pub fn register_bidirectional<A, B>(
        &self,
        a_to_b: impl Fn(A) -> B + Send + Sync + 'static,
        b_to_a: impl Fn(B) -> A + Send + Sync + 'static,
    ) where
        A: DataValue,
        B: DataValue,
    {
        self.register_unidirectional::<A, B>(a_to_b);
        self.register_unidirectional::<B, A>(b_to_a);
    }

    /// Registers conversions between every ordered pair of the given tags,
    /// all funnelled through one casting function.
    pub fn register_complete(
        &self,
        tags: &[&str],
        caster: impl Fn(&Value, &str) -> Option<Value> + Send + Sync + Clone + 'static,
    ) {
        for &from in tags {
            for &to in tags {
                if from == to {
                    continue;
                }

                let target = to.to_string();
                let cast = caster.clone();
                let conversion: ConversionFn = Arc::new(move |data: &SharedData| {
                    match cast(&data.value(), &target) {
                        Some(value) => Ok(DataBox::with_tag(target.clone(), value)),
                        None => Ok(data.clone()),
                    }
                });
                self.register_conversion(from, to, Some(conversion));
            }
        }
    }

    fn register_identity_variants(&self, tag: &str) {
        let value = tag.to_string();
        let reference = format!("{tag}&");
        let const_reference = format!("const {tag}&");
        let identity: ConversionFn = Arc::new(|data: &SharedData| Ok(data.clone()));

        let pairs = [
            (value.as_str(), reference.as_str()),
            (value.as_str(), const_reference.as_str()),
            (reference.as_str(), value.as_str()),
            (reference.as_str(), const_reference.as_str()),
            (const_reference.as_str(), value.as_str()),
        ];
        for (from, to) in pairs {
            self.register_conversion(from, to, Some(identity.clone()));
        }
    }

    /// Converts a box to the target tag.
    ///
    /// Null boxes, boxes already of the target type and conversions to
    /// [`ANY_TAG`] pass through unchanged, as do pairs with no registered
    /// entry. A registered-but-null entry fails with `ConversionMissing`.
    pub fn convert(&self, data: Option<SharedData>, to_type: &str) -> Result<Option<SharedData>> {
        let Some(data) = data else {
            return Ok(None);
        };

        if data.data_type() == to_type || to_type == ANY_TAG {
            return Ok(Some(data));
        }

        let conversion = {
            let conversions = self.conversions.read().unwrap();
            let Some(from_map) = conversions.get(data.data_type()) else {
                return Ok(Some(data));
            };
            match from_map.get(to_type) {
                None => return Ok(Some(data)),
                Some(None) => {
                    return Err(FluxError::ConversionMissing {
                        from: data.data_type().to_string(),
                        to: to_type.to_string(),
                    });
                }
                Some(Some(conversion)) => conversion.clone(),
            }
        };

        conversion(&data).map(Some)
    }

    /// Whether `from` can be handed to a port declared as `to`. Reference and
    /// const qualifiers are ignored for the comparison.
    pub fn is_convertible(&self, from: &str, to: &str) -> bool {
        let from = strip_qualifiers(from);
        let to = strip_qualifiers(to);

        if from == to || to == ANY_TAG {
            return true;
        }

        self.conversions
            .read()
            .unwrap()
            .get(from)
            .is_some_and(|targets| targets.contains_key(to))
    }
}
