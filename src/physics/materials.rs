//! Material properties and their resolution into the dense tables the force model reads.
//!
//! Materials are open-ended named properties. A force model declares which properties it
//! must have per material and which it needs per material pair; at initialization those are
//! resolved once into fixed slots so the per-contact lookup is two slice reads.

use std::collections::{BTreeMap, HashMap};

use crate::error::{DemError, DemResult};

/// Named properties of one material.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Material {
    properties: BTreeMap<String, f64>,
}

impl Material {
    /// Gets a property value.
    #[inline]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied()
    }

    /// Iterates the property names and values, sorted by name.
    pub fn properties(&self) -> impl Iterator<Item = (&str, f64)> {
        self.properties.iter().map(|(name, &value)| (name.as_str(), value))
    }
}

/// Every material loaded so far plus pairwise overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialSet {
    materials: Vec<Material>,
    pair_overrides: HashMap<(String, u32, u32), f64>,
}

impl MaterialSet {
    /// Loads a material and returns its index.
    pub fn load(&mut self, properties: &[(&str, f64)]) -> u32 {
        let material = Material {
            properties: properties
                .iter()
                .map(|&(name, value)| (name.to_owned(), value))
                .collect(),
        };
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }

    /// Gets the number of loaded materials.
    #[inline]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether no material is loaded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Gets a loaded material.
    pub fn material(&self, index: u32) -> Option<&Material> {
        self.materials.get(index as usize)
    }

    /// Sets the value of a pairwise property for one material pair, in both orders.
    pub fn set_pair_property(&mut self, name: &str, a: u32, b: u32, value: f64) -> DemResult<()> {
        let count = self.materials.len();
        if a as usize >= count || b as usize >= count {
            return Err(DemError::InvalidSettings(format!(
                "material pair ({a}, {b}) names a material that is not loaded"
            )));
        }
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        self.pair_overrides.insert((name.to_owned(), low, high), value);
        Ok(())
    }

    fn pair_value(&self, name: &str, a: u32, b: u32) -> DemResult<f64> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        if let Some(&value) = self.pair_overrides.get(&(name.to_owned(), low, high)) {
            return Ok(value);
        }
        match (
            self.materials[a as usize].get(name),
            self.materials[b as usize].get(name),
        ) {
            (Some(va), Some(vb)) => Ok(0.5 * (va + vb)),
            _ => Err(DemError::UnresolvedPairwiseProperty {
                property: name.to_owned(),
                material_a: a as usize,
                material_b: b as usize,
            }),
        }
    }

    /// Resolves the properties a force model needs into dense tables.
    ///
    /// # Arguments
    ///
    /// * `must_have` - Properties every material must define.
    /// * `must_pairwise` - Properties needed per material pair. A pair without an override
    ///   takes the mean of both materials' values.
    ///
    /// # Returns
    ///
    /// * The resolved table, or the first property that cannot be resolved.
    pub fn resolve(&self, must_have: &[&str], must_pairwise: &[&str]) -> DemResult<MaterialTable> {
        let count = self.materials.len();
        let mut per_material = Vec::with_capacity(count * must_have.len());
        for (index, material) in self.materials.iter().enumerate() {
            for &name in must_have {
                let value = material
                    .get(name)
                    .ok_or_else(|| DemError::MissingMaterialProperty {
                        property: name.to_owned(),
                        material: index,
                    })?;
                per_material.push(value);
            }
        }
        let mut pairwise = Vec::with_capacity(count * count * must_pairwise.len());
        for a in 0..count as u32 {
            for b in 0..count as u32 {
                for &name in must_pairwise {
                    pairwise.push(self.pair_value(name, a, b)?);
                }
            }
        }
        Ok(MaterialTable {
            material_count: count,
            must_have_count: must_have.len(),
            pairwise_count: must_pairwise.len(),
            per_material,
            pairwise,
        })
    }
}

/// Properties of the two materials of a contact plus the resolved pairwise values, in the
/// order the force model declared them.
#[derive(Debug, Clone, Copy)]
pub struct PairMaterial<'a> {
    /// Must-have properties of material A.
    pub a: &'a [f64],
    /// Must-have properties of material B.
    pub b: &'a [f64],
    /// Pairwise properties.
    pub pair: &'a [f64],
}

/// Dense material properties resolved for one force model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialTable {
    material_count: usize,
    must_have_count: usize,
    pairwise_count: usize,
    per_material: Vec<f64>,
    pairwise: Vec<f64>,
}

impl MaterialTable {
    /// Gets the number of materials covered by the table.
    #[inline]
    pub fn material_count(&self) -> usize {
        self.material_count
    }

    /// Looks up the properties of a material pair.
    #[inline(always)]
    pub fn lookup(&self, a: u32, b: u32) -> PairMaterial<'_> {
        let (a, b) = (a as usize, b as usize);
        let pair_start = (a * self.material_count + b) * self.pairwise_count;
        PairMaterial {
            a: &self.per_material[a * self.must_have_count..(a + 1) * self.must_have_count],
            b: &self.per_material[b * self.must_have_count..(b + 1) * self.must_have_count],
            pair: &self.pairwise[pair_start..pair_start + self.pairwise_count],
        }
    }
}
