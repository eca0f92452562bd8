use serde::{Deserialize, Serialize};




// ============================================================================
/**
 * The evolved physical variables: the three components each of the electric
 * and magnetic fields. The integer value of a variant is its slot in a
 * `FieldSet`, so the enum doubles as the index type for the per-variable
 * buffer arrays.
 */
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Field {
    E0 = 0,
    E1 = 1,
    E2 = 2,
    B0 = 3,
    B1 = 4,
    B2 = 5,
}




// ============================================================================
impl Field {

    pub const COUNT: usize = 6;

    pub const ALL: [Field; 6] = [
        Field::E0,
        Field::E1,
        Field::E2,
        Field::B0,
        Field::B1,
        Field::B2,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Short name used in diagnostic file names and profile output.
    pub fn name(self) -> &'static str {
        match self {
            Field::E0 => "E0",
            Field::E1 => "E1",
            Field::E2 => "E2",
            Field::B0 => "B0",
            Field::B1 => "B1",
            Field::B2 => "B2",
        }
    }
}




// ============================================================================
/**
 * One equal-length buffer per physical variable. This is the solver's
 * replacement for a raw array-of-pointers indexed by a variable id: the
 * same "array of equal-length buffers, one per field" layout, behind an
 * indexing surface. A `FieldSet` holds either a zipped vector (one slot per
 * mesh node) or an unzipped vector (one slot per padded block cell),
 * depending on which transform produced it.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSet {
    len: usize,
    data: Vec<Vec<f64>>,
}




// ============================================================================
impl FieldSet {

    pub fn zeros(len: usize) -> Self {
        Self {
            len,
            data: (0..Field::COUNT).map(|_| vec![0.0; len]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn field(&self, f: Field) -> &[f64] {
        &self.data[f.index()]
    }

    pub fn field_mut(&mut self, f: Field) -> &mut [f64] {
        &mut self.data[f.index()]
    }

    /// Borrow the same sub-range of every variable at once.
    pub fn range(&self, start: usize, len: usize) -> [&[f64]; Field::COUNT] {
        let mut out = [&[] as &[f64]; Field::COUNT];
        for (slot, buf) in out.iter_mut().zip(self.data.iter()) {
            *slot = &buf[start..start + len];
        }
        out
    }

    /// Mutably borrow the same sub-range of every variable at once.
    pub fn range_mut(&mut self, start: usize, len: usize) -> [&mut [f64]; Field::COUNT] {
        let mut slices = self.data.iter_mut().map(|buf| &mut buf[start..start + len]);
        [
            slices.next().unwrap(),
            slices.next().unwrap(),
            slices.next().unwrap(),
            slices.next().unwrap(),
            slices.next().unwrap(),
            slices.next().unwrap(),
        ]
    }

    /// Overwrite this set with `a + s * b`, the elementary update the time
    /// integrator is built from. All operands must share one mesh layout.
    pub fn assign_axpy(&mut self, a: &FieldSet, s: f64, b: &FieldSet) {
        assert!(self.len == a.len && self.len == b.len);
        for f in 0..Field::COUNT {
            for i in 0..self.len {
                self.data[f][i] = a.data[f][i] + s * b.data[f][i];
            }
        }
    }

    /// Accumulate `s * b` into this set in place.
    pub fn add_scaled(&mut self, s: f64, b: &FieldSet) {
        assert!(self.len == b.len);
        for f in 0..Field::COUNT {
            for i in 0..self.len {
                self.data[f][i] += s * b.data[f][i];
            }
        }
    }

    pub fn fill(&mut self, value: f64) {
        for buf in self.data.iter_mut() {
            for v in buf.iter_mut() {
                *v = value;
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Field, FieldSet};

    #[test]
    fn fields_index_their_own_buffers() {
        let mut set = FieldSet::zeros(16);
        set.field_mut(Field::B1)[3] = 7.0;
        assert_eq!(set.field(Field::B1)[3], 7.0);
        assert_eq!(set.field(Field::E1)[3], 0.0);
    }

    #[test]
    fn axpy_combines_sets() {
        let mut a = FieldSet::zeros(4);
        let mut b = FieldSet::zeros(4);
        a.field_mut(Field::E0)[1] = 2.0;
        b.field_mut(Field::E0)[1] = 10.0;

        let mut out = FieldSet::zeros(4);
        out.assign_axpy(&a, 0.5, &b);
        assert_eq!(out.field(Field::E0)[1], 7.0);

        out.add_scaled(2.0, &b);
        assert_eq!(out.field(Field::E0)[1], 27.0);
    }
}
