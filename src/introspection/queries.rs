//! Catalog queries
//!
//! Every query takes one parameter, `$1`: the schema to restrict to, or NULL
//! for all user schemas. System schemas and objects owned by extensions are
//! always excluded. Names are cast to `text` so they decode as `String`.

/// List user schemas
pub const SCHEMAS: &str = r#"
    SELECT n.nspname::text AS name
    FROM pg_catalog.pg_namespace n
    WHERE n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        AND n.nspname !~ '^pg_(temp|toast_temp)_'
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_depend d
            WHERE d.classid = 'pg_catalog.pg_namespace'::regclass
                AND d.objid = n.oid AND d.deptype = 'e'
        )
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1
"#;

/// Installed extensions (plpgsql ships with every database and is skipped)
pub const EXTENSIONS: &str = r#"
    SELECT e.extname::text AS name, n.nspname::text AS schema, e.extversion AS version
    FROM pg_catalog.pg_extension e
        JOIN pg_catalog.pg_namespace n ON n.oid = e.extnamespace
    WHERE e.extname <> 'plpgsql'
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1
"#;

/// Enum types with their labels in sort order
pub const ENUMS: &str = r#"
    SELECT n.nspname::text AS schema, t.typname::text AS name,
        array_agg(e.enumlabel::text ORDER BY e.enumsortorder) AS labels
    FROM pg_catalog.pg_type t
        JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
        JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid
    WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_depend d
            WHERE d.classid = 'pg_catalog.pg_type'::regclass
                AND d.objid = t.oid AND d.deptype = 'e'
        )
        AND ($1::text IS NULL OR n.nspname = $1)
    GROUP BY n.nspname, t.typname
    ORDER BY 1, 2
"#;

/// Sequences with their owning column; identity sequences are left out
pub const SEQUENCES: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS name,
        format_type(s.seqtypid, NULL) AS data_type,
        s.seqstart AS start, s.seqincrement AS increment,
        s.seqmin AS min_value, s.seqmax AS max_value,
        s.seqcache AS cache, s.seqcycle AS cycle,
        owner_tbl.relname::text AS owned_table,
        owner_col.attname::text AS owned_column
    FROM pg_catalog.pg_sequence s
        JOIN pg_catalog.pg_class c ON c.oid = s.seqrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_catalog.pg_depend own ON own.classid = 'pg_catalog.pg_class'::regclass
            AND own.objid = c.oid
            AND own.refclassid = 'pg_catalog.pg_class'::regclass
            AND own.deptype = 'a'
        LEFT JOIN pg_catalog.pg_class owner_tbl ON owner_tbl.oid = own.refobjid
        LEFT JOIN pg_catalog.pg_attribute owner_col ON owner_col.attrelid = own.refobjid
            AND owner_col.attnum = own.refobjsubid
    WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_depend d
            WHERE d.classid = 'pg_catalog.pg_class'::regclass
                AND d.objid = c.oid AND d.deptype IN ('e', 'i')
        )
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2
"#;

/// Functions and procedures with their full definitions
pub const FUNCTIONS: &str = r#"
    SELECT n.nspname::text AS schema, p.proname::text AS name,
        pg_get_function_identity_arguments(p.oid) AS identity_args,
        CASE WHEN p.prokind = 'p' THEN NULL ELSE pg_get_function_result(p.oid) END AS result_type,
        p.prokind::text AS kind,
        l.lanname::text AS language,
        pg_get_functiondef(p.oid) AS definition
    FROM pg_catalog.pg_proc p
        JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
        JOIN pg_catalog.pg_language l ON l.oid = p.prolang
    WHERE p.prokind IN ('f', 'p')
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_depend d
            WHERE d.classid = 'pg_catalog.pg_proc'::regclass
                AND d.objid = p.oid AND d.deptype = 'e'
        )
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2, 3
"#;

/// Ordinary tables (partitions are not modelled)
pub const TABLES: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS name
    FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind = 'r'
        AND NOT c.relispartition
        AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        AND n.nspname !~ '^pg_(temp|toast_temp)_'
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_depend d
            WHERE d.classid = 'pg_catalog.pg_class'::regclass
                AND d.objid = c.oid AND d.deptype = 'e'
        )
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2
"#;

/// Table columns in attnum order. Array columns report their element type
/// in `enum_schema`/`enum_name` when it is an enum.
pub const COLUMNS: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS table_name,
        a.attname::text AS name,
        format_type(a.atttypid, a.atttypmod) AS data_type,
        NOT a.attnotnull AS nullable,
        CASE WHEN a.attgenerated = '' THEN pg_get_expr(ad.adbin, ad.adrelid) END AS default_expr,
        CASE WHEN a.attgenerated <> '' THEN pg_get_expr(ad.adbin, ad.adrelid) END AS generated_expr,
        a.attidentity::text AS identity,
        CASE WHEN et.typtype = 'e' THEN etn.nspname::text END AS enum_schema,
        CASE WHEN et.typtype = 'e' THEN et.typname::text END AS enum_name
    FROM pg_catalog.pg_attribute a
        JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
        JOIN pg_catalog.pg_type et ON et.oid =
            CASE WHEN t.typelem <> 0 AND t.typlen = -1 THEN t.typelem ELSE t.oid END
        JOIN pg_catalog.pg_namespace etn ON etn.oid = et.typnamespace
        LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
    WHERE c.relkind = 'r'
        AND NOT c.relispartition
        AND a.attnum > 0
        AND NOT a.attisdropped
        AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        AND n.nspname !~ '^pg_(temp|toast_temp)_'
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY n.nspname, c.relname, a.attnum
"#;

/// Table constraints. For foreign keys, the referenced table and the key
/// (constraint, or bare unique index) the reference resolves to.
pub const CONSTRAINTS: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS table_name,
        con.conname::text AS name,
        con.contype::text AS contype,
        pg_get_constraintdef(con.oid) AS definition,
        fn.nspname::text AS ref_schema,
        fc.relname::text AS ref_table,
        kc.conname::text AS ref_constraint,
        ki.relname::text AS ref_index
    FROM pg_catalog.pg_constraint con
        JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
        LEFT JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
        LEFT JOIN pg_catalog.pg_constraint kc ON con.contype = 'f'
            AND kc.conindid = con.conindid
            AND kc.conrelid = con.confrelid
            AND kc.contype IN ('p', 'u', 'x')
        LEFT JOIN pg_catalog.pg_class ki ON con.contype = 'f'
            AND kc.oid IS NULL
            AND ki.oid = con.conindid
    WHERE c.relkind = 'r'
        AND NOT c.relispartition
        AND con.contype IN ('p', 'u', 'c', 'f', 'x')
        AND con.conislocal
        AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2, 3
"#;

/// Indexes not created implicitly by a constraint
pub const INDEXES: &str = r#"
    SELECT n.nspname::text AS schema, t.relname::text AS relation,
        t.relkind::text AS relkind,
        i.relname::text AS name,
        pg_get_indexdef(i.oid) AS definition,
        x.indisunique AS is_unique
    FROM pg_catalog.pg_index x
        JOIN pg_catalog.pg_class i ON i.oid = x.indexrelid
        JOIN pg_catalog.pg_class t ON t.oid = x.indrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = i.relnamespace
    WHERE t.relkind IN ('r', 'm')
        AND NOT t.relispartition
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_constraint con
            WHERE con.conindid = x.indexrelid
                AND con.conrelid = x.indrelid
                AND con.contype IN ('p', 'u', 'x')
        )
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_depend d
            WHERE d.classid = 'pg_catalog.pg_class'::regclass
                AND d.objid = t.oid AND d.deptype = 'e'
        )
        AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        AND n.nspname !~ '^pg_(temp|toast_temp)_'
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2, 4
"#;

/// Views and materialized views
pub const VIEWS: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS name,
        c.relkind = 'm' AS materialized,
        pg_get_viewdef(c.oid) AS definition
    FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('v', 'm')
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND NOT EXISTS (
            SELECT 1 FROM pg_catalog.pg_depend d
            WHERE d.classid = 'pg_catalog.pg_class'::regclass
                AND d.objid = c.oid AND d.deptype = 'e'
        )
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2
"#;

/// User triggers with the function they call
pub const TRIGGERS: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS relation,
        c.relkind::text AS relkind,
        t.tgname::text AS name,
        pg_get_triggerdef(t.oid) AS definition,
        pn.nspname::text AS function_schema,
        p.proname || '(' || pg_get_function_identity_arguments(p.oid) || ')' AS function_signature
    FROM pg_catalog.pg_trigger t
        JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_catalog.pg_proc p ON p.oid = t.tgfoid
        JOIN pg_catalog.pg_namespace pn ON pn.oid = p.pronamespace
    WHERE NOT t.tgisinternal
        AND c.relkind IN ('r', 'v', 'm')
        AND NOT c.relispartition
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2, 4
"#;

/// Relation privileges other than the owner's own
pub const GRANTS: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS relation,
        c.relkind::text AS relkind,
        CASE WHEN acl.grantee = 0 THEN 'PUBLIC'
            ELSE pg_get_userbyid(acl.grantee)::text END AS grantee,
        acl.privilege_type AS privilege,
        acl.is_grantable AS grantable
    FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        CROSS JOIN LATERAL aclexplode(c.relacl) AS acl
    WHERE c.relkind IN ('r', 'v', 'm', 'S')
        AND NOT c.relispartition
        AND c.relacl IS NOT NULL
        AND acl.grantee <> c.relowner
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        AND ($1::text IS NULL OR n.nspname = $1)
    ORDER BY 1, 2, 4, 5
"#;

/// Normal dependencies of column defaults, constraints, indexes, function
/// signatures and view rules on sequences, functions, enums and relations.
pub const DEPENDENCIES: &str = r#"
    WITH refs AS (
        SELECT 'pg_catalog.pg_class'::regclass::oid AS refclassid, c.oid AS refobjid,
            CASE c.relkind WHEN 'S' THEN 'sequence' WHEN 'r' THEN 'table' ELSE 'view' END AS ref_kind,
            n.nspname::text AS ref_schema, c.relname::text AS ref_name
        FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('S', 'r', 'v', 'm')
        UNION ALL
        SELECT 'pg_catalog.pg_proc'::regclass::oid, p.oid, 'function', n.nspname::text,
            p.proname || '(' || pg_get_function_identity_arguments(p.oid) || ')'
        FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
        WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
        UNION ALL
        SELECT 'pg_catalog.pg_type'::regclass::oid, t.oid, 'type', n.nspname::text, t.typname::text
        FROM pg_catalog.pg_type t
            JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
        WHERE t.typtype = 'e'
        UNION ALL
        SELECT 'pg_catalog.pg_type'::regclass::oid, t.oid,
            CASE c.relkind WHEN 'r' THEN 'table' ELSE 'view' END,
            n.nspname::text, c.relname::text
        FROM pg_catalog.pg_type t
            JOIN pg_catalog.pg_class c ON c.oid = t.typrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'v', 'm')
    ),
    owners AS (
        SELECT 'pg_catalog.pg_attrdef'::regclass::oid AS classid, ad.oid AS objid,
            'table' AS owner_kind, n.nspname::text AS schema,
            NULL::text AS parent, c.relname::text AS name
        FROM pg_catalog.pg_attrdef ad
            JOIN pg_catalog.pg_class c ON c.oid = ad.adrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        UNION ALL
        SELECT 'pg_catalog.pg_constraint'::regclass::oid, con.oid, 'constraint',
            n.nspname::text, c.relname::text, con.conname::text
        FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        UNION ALL
        SELECT 'pg_catalog.pg_class'::regclass::oid, i.oid, 'index',
            n.nspname::text, t.relname::text, i.relname::text
        FROM pg_catalog.pg_index x
            JOIN pg_catalog.pg_class i ON i.oid = x.indexrelid
            JOIN pg_catalog.pg_class t ON t.oid = x.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = i.relnamespace
        UNION ALL
        SELECT 'pg_catalog.pg_proc'::regclass::oid, p.oid, 'function',
            n.nspname::text, NULL::text,
            p.proname || '(' || pg_get_function_identity_arguments(p.oid) || ')'
        FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
        UNION ALL
        SELECT 'pg_catalog.pg_rewrite'::regclass::oid, r.oid, 'view',
            n.nspname::text, NULL::text, c.relname::text
        FROM pg_catalog.pg_rewrite r
            JOIN pg_catalog.pg_class c ON c.oid = r.ev_class
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('v', 'm')
    )
    SELECT DISTINCT o.owner_kind, o.schema, o.parent, o.name,
        r.ref_kind, r.ref_schema, r.ref_name
    FROM pg_catalog.pg_depend d
        JOIN owners o ON o.classid = d.classid AND o.objid = d.objid
        JOIN refs r ON r.refclassid = d.refclassid AND r.refobjid = d.refobjid
    WHERE d.deptype = 'n'
        AND o.schema NOT IN ('pg_catalog', 'information_schema')
        AND ($1::text IS NULL OR o.schema = $1)
    ORDER BY 1, 2, 3, 4, 5, 6, 7
"#;
