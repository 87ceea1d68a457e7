//! Fixed option lists offered by the complaint and account forms.

use serde::Serialize;

pub const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Academic",
        &[
            "Unfair grading",
            "Incompetent faculty",
            "Lack of academic support",
            "Course content issues",
            "Unreasonable workload",
        ],
    ),
    (
        "Health and Safety",
        &[
            "Unsafe conditions",
            "Health services issues",
            "Mental health support",
            "Emergency response",
            "COVID-19 protocols",
        ],
    ),
    (
        "Technology and Digital",
        &[
            "Wi-Fi connectivity",
            "Learning management system",
            "Computer lab issues",
            "Software access",
            "IT support",
        ],
    ),
    (
        "Student Life and Extracurricular",
        &[
            "Club/organization issues",
            "Event planning problems",
            "Discrimination in activities",
            "Lack of opportunities",
            "Funding issues",
        ],
    ),
    (
        "Disciplinary and Behavioral",
        &[
            "Unfair punishment",
            "Bullying/harassment",
            "Code of conduct issues",
            "Reporting process",
            "Appeal process",
        ],
    ),
    (
        "Facilities and Infrastructure",
        &[
            "Classroom conditions",
            "Dormitory issues",
            "Cafeteria/food quality",
            "Accessibility concerns",
            "Maintenance problems",
        ],
    ),
    (
        "Administrative",
        &[
            "Registration issues",
            "Financial aid problems",
            "Transcript errors",
            "Scheduling conflicts",
            "Staff responsiveness",
        ],
    ),
];

pub const DEPARTMENTS: &[&str] = &[
    "Computer Science",
    "Information Technology",
    "Cyber Security",
    "Software Engineering",
    "Data Science",
    "Artificial Intelligence",
    "Electrical Engineering",
    "Mechanical Engineering",
    "Civil Engineering",
    "Business Administration",
];

pub const PROGRAMS: &[&str] = &["ADP", "BS", "Masters", "MPhil", "PhD"];

/// Canonical (category, subcategory) spelling for a case-insensitive match.
pub fn canonical_category(category: &str, subcategory: &str) -> Option<(&'static str, &'static str)> {
    let &(name, subs) = CATEGORIES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(category.trim()))?;
    let sub = subs
        .iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(subcategory.trim()))?;
    Some((name, sub))
}

pub fn canonical_department(department: &str) -> Option<&'static str> {
    let wanted = department.trim().replace('-', " ");
    DEPARTMENTS
        .iter()
        .copied()
        .find(|d| d.eq_ignore_ascii_case(&wanted))
}

pub fn canonical_program(program: &str) -> Option<&'static str> {
    PROGRAMS
        .iter()
        .copied()
        .find(|p| p.eq_ignore_ascii_case(program.trim()))
}

#[derive(Debug, Serialize)]
pub struct CategoryEntry {
    pub name: &'static str,
    pub subcategories: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct Catalog {
    pub categories: Vec<CategoryEntry>,
    pub departments: &'static [&'static str],
    pub programs: &'static [&'static str],
}

pub fn catalog() -> Catalog {
    Catalog {
        categories: CATEGORIES
            .iter()
            .map(|&(name, subcategories)| CategoryEntry { name, subcategories })
            .collect(),
        departments: DEPARTMENTS,
        programs: PROGRAMS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_lookup_ignores_case() {
        assert_eq!(
            canonical_category("health and safety", "mental health support"),
            Some(("Health and Safety", "Mental health support"))
        );
        assert_eq!(canonical_category("Academic", "Wi-Fi connectivity"), None);
        assert_eq!(canonical_category("Sports", "Anything"), None);
    }

    #[test]
    fn department_accepts_slug_form() {
        assert_eq!(canonical_department("computer-science"), Some("Computer Science"));
        assert_eq!(canonical_department("Astronomy"), None);
        assert_eq!(canonical_program("mphil"), Some("MPhil"));
    }
}
