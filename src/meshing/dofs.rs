// src/meshing/dofs.rs

//! Degree-of-freedom layout of a continuous Lagrange space on the active cells.

use super::Mesh;
use crate::kernel::Point;

/// Maps the nodes of a continuous Q_k space on the active part of the mesh to a
/// compact global numbering.
///
/// Two handlers compare equal exactly when they describe the same layout, which
/// is how the time integrator detects that stored solutions need a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct DofHandler {
    degree: usize,
    nodes_x: usize,
    nodes_y: usize,
    node_to_dof: Vec<Option<usize>>,
    dof_to_node: Vec<usize>,
}

impl DofHandler {
    /// Numbers the nodes of every cell for which `active` holds, in node order.
    pub fn distribute(mesh: &Mesh, degree: usize, active: impl Fn(usize) -> bool) -> Self {
        let degree = degree.max(1);
        let nodes_x = degree * mesh.nx + 1;
        let nodes_y = degree * mesh.ny + 1;
        let mut used = vec![false; nodes_x * nodes_y];

        for cell in (0..mesh.n_cells()).filter(|&c| active(c)) {
            for node in cell_nodes(mesh, degree, nodes_x, cell) {
                used[node] = true;
            }
        }

        let mut node_to_dof = vec![None; used.len()];
        let mut dof_to_node = Vec::new();
        for (node, &is_used) in used.iter().enumerate() {
            if is_used {
                node_to_dof[node] = Some(dof_to_node.len());
                dof_to_node.push(node);
            }
        }

        DofHandler { degree, nodes_x, nodes_y, node_to_dof, dof_to_node }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn n_dofs(&self) -> usize {
        self.dof_to_node.len()
    }

    pub fn dofs_per_cell(&self) -> usize {
        (self.degree + 1).pow(2)
    }

    pub fn dof_of_node(&self, node: usize) -> Option<usize> {
        self.node_to_dof.get(node).copied().flatten()
    }

    /// Global dofs of `cell` in local shape-function order, or `None` when the
    /// cell is not part of the layout.
    pub fn cell_dofs(&self, mesh: &Mesh, cell: usize) -> Option<Vec<usize>> {
        cell_nodes(mesh, self.degree, self.nodes_x, cell)
            .into_iter()
            .map(|node| self.dof_of_node(node))
            .collect()
    }

    /// Physical location of the node carrying `dof`.
    pub fn dof_point(&self, mesh: &Mesh, dof: usize) -> Point {
        self.node_point(mesh, self.dof_to_node[dof])
    }

    fn node_point(&self, mesh: &Mesh, node: usize) -> Point {
        let (gx, gy) = (node % self.nodes_x, node / self.nodes_x);
        let k = self.degree as f64;
        Point::new(
            mesh.lower[0] + mesh.hx() * gx as f64 / k,
            mesh.lower[1] + mesh.hy() * gy as f64 / k,
        )
    }

    /// Nodal interpolation of `f` into this layout.
    pub fn interpolate(&self, mesh: &Mesh, f: impl Fn(&Point) -> f64) -> Vec<f64> {
        (0..self.n_dofs()).map(|dof| f(&self.dof_point(mesh, dof))).collect()
    }

    /// Moves nodal `values` laid out by `from` onto this layout.
    ///
    /// Nodes present in both layouts keep their value. A node that only became
    /// active now takes the mean of the previously active nodes of the cells
    /// around it, or zero when none of them was active.
    pub fn transfer(&self, mesh: &Mesh, from: &DofHandler, values: &[f64]) -> Vec<f64> {
        debug_assert_eq!(self.degree, from.degree);
        debug_assert_eq!(values.len(), from.n_dofs());

        self.dof_to_node
            .iter()
            .map(|&node| {
                if let Some(old) = from.dof_of_node(node) {
                    return values[old];
                }
                let (sum, count) = self
                    .cells_around(mesh, node)
                    .into_iter()
                    .flat_map(|cell| cell_nodes(mesh, self.degree, self.nodes_x, cell))
                    .filter_map(|n| from.dof_of_node(n))
                    .fold((0.0, 0usize), |(s, c), old| (s + values[old], c + 1));
                if count == 0 {
                    0.0
                } else {
                    sum / count as f64
                }
            })
            .collect()
    }

    fn cells_around(&self, mesh: &Mesh, node: usize) -> Vec<usize> {
        let (gx, gy) = (node % self.nodes_x, node / self.nodes_x);
        let span = |g: usize, n_cells: usize| -> Vec<usize> {
            let c = g / self.degree;
            let mut out = Vec::with_capacity(2);
            if g % self.degree == 0 && c > 0 {
                out.push(c - 1);
            }
            if c < n_cells {
                out.push(c);
            }
            out
        };
        debug_assert!(gy < self.nodes_y);
        let xs = span(gx, mesh.nx);
        let ys = span(gy, mesh.ny);
        ys.iter()
            .flat_map(|&iy| xs.iter().map(move |&ix| mesh.cell_index(ix, iy)))
            .collect()
    }
}

/// Lattice node indices of `cell` in local shape-function order.
fn cell_nodes(mesh: &Mesh, degree: usize, nodes_x: usize, cell: usize) -> Vec<usize> {
    let (ix, iy) = mesh.cell_coords(cell);
    let n = degree + 1;
    (0..n * n)
        .map(|local| {
            let (i, j) = (local % n, local / n);
            (degree * ix + i) + nodes_x * (degree * iy + j)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mesh() -> Mesh {
        Mesh::rectangle([0.0, 0.0], [3.0, 1.0], 3, 1).unwrap()
    }

    #[test]
    fn test_full_layout_counts_every_node() {
        let mesh = mesh();
        let q1 = DofHandler::distribute(&mesh, 1, |_| true);
        assert_eq!(q1.n_dofs(), 8);
        let q2 = DofHandler::distribute(&mesh, 2, |_| true);
        assert_eq!(q2.n_dofs(), 7 * 3);
        assert_eq!(q2.dofs_per_cell(), 9);
    }

    #[test]
    fn test_inactive_cells_have_no_dofs() {
        let mesh = mesh();
        let dofs = DofHandler::distribute(&mesh, 1, |cell| cell == 0);
        assert_eq!(dofs.n_dofs(), 4);
        assert!(dofs.cell_dofs(&mesh, 0).is_some());
        assert!(dofs.cell_dofs(&mesh, 2).is_none());
        // Cell 1 shares only its west face with cell 0.
        assert!(dofs.cell_dofs(&mesh, 1).is_none());
    }

    #[test]
    fn test_shared_nodes_get_one_dof() {
        let mesh = mesh();
        let dofs = DofHandler::distribute(&mesh, 1, |_| true);
        let left = dofs.cell_dofs(&mesh, 0).unwrap();
        let right = dofs.cell_dofs(&mesh, 1).unwrap();
        // East nodes of cell 0 are the west nodes of cell 1.
        assert_eq!(left[1], right[0]);
        assert_eq!(left[3], right[2]);
        let p = dofs.dof_point(&mesh, left[3]);
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 1.0);
    }

    #[test]
    fn test_transfer_copies_shared_and_extends_new_nodes() {
        let mesh = mesh();
        let old = DofHandler::distribute(&mesh, 1, |cell| cell == 0);
        let new = DofHandler::distribute(&mesh, 1, |cell| cell <= 1);
        let values = old.interpolate(&mesh, |p| 1.0 + p.x);

        let moved = new.transfer(&mesh, &old, &values);
        assert_eq!(moved.len(), new.n_dofs());
        for dof in 0..new.n_dofs() {
            let p = new.dof_point(&mesh, dof);
            if p.x <= 1.0 {
                assert_relative_eq!(moved[dof], 1.0 + p.x, epsilon = 1e-14);
            } else {
                // New nodes at x = 2 see the x = 1 nodes of cell 1 only.
                assert_relative_eq!(moved[dof], 2.0, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_identical_layouts_compare_equal() {
        let mesh = mesh();
        let a = DofHandler::distribute(&mesh, 2, |cell| cell != 1);
        let b = DofHandler::distribute(&mesh, 2, |cell| cell != 1);
        let c = DofHandler::distribute(&mesh, 2, |_| true);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
