use super::tables::{domain_tables, get_table};
use super::types::Domain;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Dependency graph between domains.
///
/// Edges are derived from the foreign keys of each domain's tables: a domain requires
/// every other domain owning a table its tables reference.
pub struct DependencyResolver {
    /// Map of domain -> domains it directly requires
    deps: HashMap<Domain, BTreeSet<Domain>>,
    /// Map of domain -> domains that directly require it
    reverse_deps: HashMap<Domain, BTreeSet<Domain>>,
}

/// Domain whose regenerator writes `table`
fn owning_domain(table: &str) -> Option<Domain> {
    Domain::ALL
        .into_iter()
        .find(|d| domain_tables(*d).iter().any(|t| t.name == table))
}

impl DependencyResolver {
    pub fn new() -> Self {
        let mut deps: HashMap<Domain, BTreeSet<Domain>> = HashMap::new();
        let mut reverse_deps: HashMap<Domain, BTreeSet<Domain>> = HashMap::new();

        for domain in Domain::ALL {
            let entry = deps.entry(domain).or_default();
            for table in domain_tables(domain) {
                for parent_table in table.dependencies() {
                    let Some(parent) = get_table(parent_table).and_then(|t| owning_domain(t.name))
                    else {
                        continue;
                    };
                    // Item -> Category stays inside the item domain
                    if parent != domain {
                        entry.insert(parent);
                        reverse_deps.entry(parent).or_default().insert(domain);
                    }
                }
            }
        }

        Self { deps, reverse_deps }
    }

    /// Domains `domain` directly requires
    pub fn requires(&self, domain: Domain) -> impl Iterator<Item = Domain> + '_ {
        self.deps.get(&domain).into_iter().flatten().copied()
    }

    /// Expand a requested set until it is closed under the requires relation
    pub fn closure(&self, requested: impl IntoIterator<Item = Domain>) -> BTreeSet<Domain> {
        let mut included: BTreeSet<Domain> = BTreeSet::new();
        let mut queue: VecDeque<Domain> = requested.into_iter().collect();

        while let Some(domain) = queue.pop_front() {
            if !included.insert(domain) {
                continue;
            }
            for dep in self.requires(domain) {
                if !included.contains(&dep) {
                    queue.push_back(dep);
                }
            }
        }

        included
    }

    /// Expand and order a requested set, parents before children
    pub fn resolve(&self, requested: impl IntoIterator<Item = Domain>) -> Result<Vec<Domain>, String> {
        let included = self.closure(requested);
        self.topological_sort(&included)
    }

    /// Every domain in `run` that transitively requires `domain`
    pub fn dependents_within(&self, domain: Domain, run: &[Domain]) -> Vec<Domain> {
        let mut found: BTreeSet<Domain> = BTreeSet::new();
        let mut queue: VecDeque<Domain> = VecDeque::from([domain]);

        while let Some(current) = queue.pop_front() {
            for child in self.reverse_deps.get(&current).into_iter().flatten() {
                if found.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }

        run.iter().copied().filter(|d| found.contains(d)).collect()
    }

    /// Topological sort of domains by dependencies. Siblings keep canonical order.
    fn topological_sort(&self, included: &BTreeSet<Domain>) -> Result<Vec<Domain>, String> {
        let mut result = Vec::new();
        let mut visited: HashSet<Domain> = HashSet::new();
        let mut temp_visited: HashSet<Domain> = HashSet::new();

        for domain in Domain::ALL {
            if included.contains(&domain) && !visited.contains(&domain) {
                self.visit(domain, included, &mut visited, &mut temp_visited, &mut result)?;
            }
        }

        Ok(result)
    }

    fn visit(
        &self,
        domain: Domain,
        included: &BTreeSet<Domain>,
        visited: &mut HashSet<Domain>,
        temp_visited: &mut HashSet<Domain>,
        result: &mut Vec<Domain>,
    ) -> Result<(), String> {
        if temp_visited.contains(&domain) {
            return Err(format!("Circular dependency detected at: {}", domain));
        }
        if visited.contains(&domain) {
            return Ok(());
        }

        temp_visited.insert(domain);

        for dep in self.requires(domain) {
            if included.contains(&dep) {
                self.visit(dep, included, visited, temp_visited, result)?;
            }
        }

        temp_visited.remove(&domain);
        visited.insert(domain);
        result.push(domain);

        Ok(())
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Domain::*;

    #[test]
    fn test_derived_edges_match_implication_table() {
        let resolver = DependencyResolver::new();
        let closure = |d: Domain| resolver.closure([d]);

        assert_eq!(closure(Station), BTreeSet::from([Station, System]));
        assert_eq!(closure(ShipVendor), BTreeSet::from([ShipVendor, System, Station, Ship]));
        assert_eq!(
            closure(UpgradeVendor),
            BTreeSet::from([UpgradeVendor, System, Station, Upgrade])
        );
        assert_eq!(closure(Listings), BTreeSet::from([Listings, Item, System, Station]));
        assert_eq!(closure(Item), BTreeSet::from([Item]));
        assert_eq!(closure(Ship), BTreeSet::from([Ship]));
    }

    #[test]
    fn test_listings_order() {
        let resolver = DependencyResolver::new();
        let order = resolver.resolve([Listings]).unwrap();
        assert_eq!(order, vec![Item, System, Station, Listings]);
    }

    #[test]
    fn test_full_order_parents_first() {
        let resolver = DependencyResolver::new();
        let order = resolver.resolve(Domain::ALL).unwrap();
        assert_eq!(order.len(), 8);
        for (pos, domain) in order.iter().enumerate() {
            for dep in resolver.requires(*domain) {
                let dep_pos = order.iter().position(|d| *d == dep).unwrap();
                assert!(dep_pos < pos, "{} ordered before {}", domain, dep);
            }
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let resolver = DependencyResolver::new();
        for requested in [vec![Station], vec![ShipVendor, Item], vec![Listings, UpgradeVendor]] {
            let once = resolver.resolve(requested).unwrap();
            let twice = resolver.resolve(once.clone()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_dependents_within_run() {
        let resolver = DependencyResolver::new();
        let run = vec![Item, System, Station, Ship, ShipVendor, Listings];
        assert_eq!(
            resolver.dependents_within(System, &run),
            vec![Station, ShipVendor, Listings]
        );
        assert_eq!(resolver.dependents_within(Ship, &run), vec![ShipVendor]);
        assert!(resolver.dependents_within(Listings, &run).is_empty());
        assert!(resolver.dependents_within(Upgrade, &run).is_empty());
    }
}
